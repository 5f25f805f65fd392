//! [`ChatService`] over the server's REST endpoints.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use pairchat_proto::conversation::{ChatId, CreateChatRequest, MarkReadRequest, WireConversation};
use pairchat_proto::message::MessageId;
use pairchat_proto::user::{UserId, UserProfile};

use super::{ChatService, ServiceError};
use crate::session::Session;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client bound to one session.
#[derive(Debug, Clone)]
pub struct HttpChatService {
    http: Client,
    base: Url,
    token: String,
}

impl HttpChatService {
    /// Build a client for the API rooted at `base` (e.g. `http://host:5000`).
    ///
    /// # Errors
    ///
    /// [`ServiceError::Request`] if the HTTP client cannot be constructed.
    pub fn new(mut base: Url, session: &Session, timeout: Duration) -> Result<Self, ServiceError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            token: session.auth_token().to_string(),
        })
    }

    /// The API root all endpoints are resolved against.
    #[must_use]
    pub const fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ServiceError> {
        Ok(self.base.join(path)?)
    }

    fn with_auth(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.token)
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ServiceError> {
        let response = self.with_auth(req).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => {
                tracing::warn!("request rejected: unauthorized");
                Err(ServiceError::Unauthorized)
            }
            status if !status.is_success() => {
                tracing::debug!(status = status.as_u16(), url = %response.url(), "request failed");
                Err(ServiceError::Status(status.as_u16()))
            }
            _ => Ok(response),
        }
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ServiceError> {
        Ok(self.send(req).await?.json::<T>().await?)
    }
}

impl ChatService for HttpChatService {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ServiceError> {
        let url = self.endpoint("api/chat/chats")?;
        self.json(self.http.get(url)).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserProfile>, ServiceError> {
        let mut url = self.endpoint("api/chat/search")?;
        url.query_pairs_mut().append_pair("query", query);
        self.json(self.http.get(url)).await
    }

    async fn create_or_get(&self, user: &UserId) -> Result<WireConversation, ServiceError> {
        let url = self.endpoint("api/chat/create")?;
        let body = CreateChatRequest {
            user_id: user.clone(),
        };
        self.json(self.http.post(url).json(&body)).await
    }

    async fn get_conversation(&self, id: &ChatId) -> Result<WireConversation, ServiceError> {
        let url = conversation_url(&self.base, id)?;
        self.json(self.http.get(url)).await
    }

    async fn mark_message_read(
        &self,
        chat: &ChatId,
        message: &MessageId,
    ) -> Result<(), ServiceError> {
        let url = self.endpoint("api/chat/message/read")?;
        let body = MarkReadRequest {
            chat_id: chat.clone(),
            message_id: message.clone(),
        };
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }
}

/// `api/chat/{id}` with the id percent-encoded as a single segment.
fn conversation_url(base: &Url, id: &ChatId) -> Result<Url, ServiceError> {
    let mut url = base.join("api/chat/")?;
    url.path_segments_mut()
        .map_err(|()| ServiceError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .push(id.as_str());
    Ok(url)
}
