use anyhow::Context;
use momentum_engine::{
    collaborators::{
        AuthorizationOracle,
        Notifier,
        NotifyError,
    },
    model::{
        ChatId,
        MessageRef,
        UserId,
    },
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    de::DeserializeOwned,
};
use serde_json::{
    Value,
    json,
};
use std::time::Duration;
use tracing::{
    debug,
    warn,
};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.telegram.org/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BotUser {
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct IncomingMessage {
    pub chat: ChatRef,
    pub from: Option<Sender>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRef {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Sender {
    pub id: i64,
}

/// Bot API client. The token is part of every request URL, so neither the
/// URL nor the client are ever logged.
pub struct TelegramClient {
    http: reqwest::Client,
    base: Url,
}

impl TelegramClient {
    pub fn new(api_url: &Url, token: &str) -> crate::Result<Self> {
        // tokens contain a colon, so they cannot go through `Url::join`
        let root = api_url.as_str().trim_end_matches('/');
        let base = Url::parse(&format!("{root}/bot{token}/"))
            .context("build Telegram API base url")?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("build Telegram HTTP client")?;
        Ok(Self { http, base })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &Value,
    ) -> Result<T, NotifyError> {
        let url = self
            .base
            .join(method)
            .map_err(|err| NotifyError::Rejected(format!("invalid method {method}: {err}")))?;
        let response = self
            .http
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|err| NotifyError::Network(err.without_url().to_string()))?;
        let status = response.status();
        let body = response.json::<ApiResponse<T>>().await.map_err(|err| {
            let err = err.without_url();
            if status.is_server_error() {
                NotifyError::Network(format!("{method} returned {status}"))
            } else {
                NotifyError::Rejected(format!("{method} returned unreadable body: {err}"))
            }
        })?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            body => Err(classify(method, status, body)),
        }
    }

    /// Long-polls for messages after `offset`.
    pub(crate) async fn updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, NotifyError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message"],
            }),
        )
        .await
    }

    pub async fn bot_username(&self) -> Result<Option<String>, NotifyError> {
        let me: BotUser = self.call("getMe", &json!({})).await?;
        Ok(me.username)
    }

    async fn send_message(&self, chat: ChatId, text: &str) -> Result<MessageRef, NotifyError> {
        let sent: SentMessage = self
            .call("sendMessage", &json!({ "chat_id": chat.0, "text": text }))
            .await?;
        Ok(MessageRef(sent.message_id))
    }

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageRef,
        text: &str,
    ) -> Result<(), NotifyError> {
        let edited = self
            .call::<Value>(
                "editMessageText",
                &json!({ "chat_id": chat.0, "message_id": message.0, "text": text }),
            )
            .await;
        match edited {
            Ok(_) => Ok(()),
            Err(NotifyError::Rejected(description))
                if description.contains("message is not modified") =>
            {
                debug!(%chat, %message, "status message unchanged");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn pin_message(&self, chat: ChatId, message: MessageRef) -> Result<(), NotifyError> {
        self.call::<bool>(
            "pinChatMessage",
            &json!({
                "chat_id": chat.0,
                "message_id": message.0,
                "disable_notification": true,
            }),
        )
        .await
        .map(|_| ())
    }
}

fn classify<T>(method: &str, status: StatusCode, body: ApiResponse<T>) -> NotifyError {
    let description = body
        .description
        .unwrap_or_else(|| format!("{method} returned {status}"));
    let code = body.error_code.unwrap_or(status.as_u16());
    if code == StatusCode::TOO_MANY_REQUESTS.as_u16() {
        let retry_after = body
            .parameters
            .and_then(|parameters| parameters.retry_after)
            .map(Duration::from_secs);
        NotifyError::RateLimited { retry_after }
    } else if status.is_server_error() {
        NotifyError::Network(description)
    } else if description.contains("message to edit not found") {
        NotifyError::MessageNotFound
    } else {
        NotifyError::Rejected(description)
    }
}

impl Notifier for TelegramClient {
    async fn post_or_update(
        &self,
        chat: ChatId,
        existing: Option<MessageRef>,
        text: &str,
    ) -> Result<MessageRef, NotifyError> {
        if let Some(message) = existing {
            match self.edit_message(chat, message, text).await {
                Ok(()) => return Ok(message),
                Err(NotifyError::MessageNotFound) => {
                    warn!(%chat, %message, "status message is gone, posting a new one");
                }
                Err(err) => return Err(err),
            }
        }

        let message = self.send_message(chat, text).await?;
        if let Err(err) = self.pin_message(chat, message).await {
            warn!(%chat, %message, %err, "failed to pin status message");
        }
        Ok(message)
    }

    async fn send(&self, chat: ChatId, text: &str) -> Result<(), NotifyError> {
        self.send_message(chat, text).await.map(|_| ())
    }
}

impl AuthorizationOracle for TelegramClient {
    async fn is_privileged(&self, chat: ChatId, user: UserId) -> bool {
        if chat.is_private() {
            return true;
        }
        let member = self
            .call::<ChatMember>(
                "getChatMember",
                &json!({ "chat_id": chat.0, "user_id": user.0 }),
            )
            .await;
        match member {
            Ok(member) => matches!(member.status.as_str(), "creator" | "administrator"),
            Err(err) => {
                warn!(%chat, %user, %err, "admin check failed, treating as regular user");
                false
            }
        }
    }
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::fake_http::{
        FakeHttpServer,
        ScriptedResponse,
    };

    const TOKEN: &str = "123:SECRET";
    const CHAT: ChatId = ChatId(-1001);

    fn path(method: &str) -> String {
        format!("/bot{TOKEN}/{method}")
    }

    fn client(server: &FakeHttpServer) -> TelegramClient {
        let api_url = Url::parse(server.base_url()).unwrap();
        TelegramClient::new(&api_url, TOKEN).unwrap()
    }

    fn sent(message_id: i64) -> ScriptedResponse {
        ScriptedResponse::ok(json!({ "ok": true, "result": { "message_id": message_id } }))
    }

    fn failed(status: u16, description: &str) -> ScriptedResponse {
        ScriptedResponse::status(
            status,
            json!({ "ok": false, "error_code": status, "description": description }),
        )
    }

    #[tokio::test]
    async fn post_or_update__no_existing_message__sends_and_pins() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(&path("sendMessage"), sent(42));
        server.respond(
            &path("pinChatMessage"),
            ScriptedResponse::ok(json!({ "ok": true, "result": true })),
        );
        let client = client(&server);

        // when
        let message = client.post_or_update(CHAT, None, "score: 0").await;

        // then
        assert_eq!(message, Ok(MessageRef(42)));
        let sends = server.requests_to(&path("sendMessage"));
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].body["chat_id"], json!(-1001));
        assert_eq!(sends[0].body["text"], json!("score: 0"));
        let pins = server.requests_to(&path("pinChatMessage"));
        assert_eq!(pins.len(), 1);
        assert_eq!(pins[0].body["message_id"], json!(42));
    }

    #[tokio::test]
    async fn post_or_update__unchanged_text__keeps_existing_message() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            &path("editMessageText"),
            failed(
                400,
                "Bad Request: message is not modified: specified new message content and reply markup are exactly the same",
            ),
        );
        let client = client(&server);

        // when
        let message = client
            .post_or_update(CHAT, Some(MessageRef(7)), "score: 3")
            .await;

        // then
        assert_eq!(message, Ok(MessageRef(7)));
        assert!(server.requests_to(&path("sendMessage")).is_empty());
    }

    #[tokio::test]
    async fn post_or_update__edited_message_missing__posts_replacement() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            &path("editMessageText"),
            failed(400, "Bad Request: message to edit not found"),
        );
        server.respond(&path("sendMessage"), sent(99));
        server.respond(
            &path("pinChatMessage"),
            ScriptedResponse::ok(json!({ "ok": true, "result": true })),
        );
        let client = client(&server);

        // when
        let message = client
            .post_or_update(CHAT, Some(MessageRef(7)), "score: 3")
            .await;

        // then
        assert_eq!(message, Ok(MessageRef(99)));
        assert_eq!(server.requests_to(&path("pinChatMessage")).len(), 1);
    }

    #[tokio::test]
    async fn post_or_update__pin_rejected__still_returns_new_message() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(&path("sendMessage"), sent(5));
        server.respond(
            &path("pinChatMessage"),
            failed(400, "Bad Request: not enough rights to pin a message"),
        );
        let client = client(&server);

        // when
        let message = client.post_or_update(CHAT, None, "score: 0").await;

        // then
        assert_eq!(message, Ok(MessageRef(5)));
    }

    #[tokio::test]
    async fn send__too_many_requests__reports_retry_hint() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            &path("sendMessage"),
            ScriptedResponse::status(
                429,
                json!({
                    "ok": false,
                    "error_code": 429,
                    "description": "Too Many Requests: retry after 7",
                    "parameters": { "retry_after": 7 },
                }),
            ),
        );
        let client = client(&server);

        // when
        let result = client.send(CHAT, "hello").await;

        // then
        assert_eq!(
            result,
            Err(NotifyError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            })
        );
    }

    #[tokio::test]
    async fn send__server_error__is_network_failure() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(&path("sendMessage"), failed(502, "Bad Gateway"));
        let client = client(&server);

        // when
        let result = client.send(CHAT, "hello").await;

        // then
        assert!(matches!(result, Err(NotifyError::Network(_))));
    }

    #[tokio::test]
    async fn send__unreachable_api__error_does_not_leak_token() {
        // given
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let api_url = Url::parse(&format!("http://{address}")).unwrap();
        let client = TelegramClient::new(&api_url, TOKEN).unwrap();

        // when
        let result = client.send(CHAT, "hello").await;

        // then
        let err = result.unwrap_err();
        assert!(matches!(err, NotifyError::Network(_)));
        assert!(!err.to_string().contains("SECRET"));
    }

    #[tokio::test]
    async fn is_privileged__private_chat__skips_lookup() {
        // given
        let server = FakeHttpServer::start().await;
        let client = client(&server);

        // when
        let privileged = client.is_privileged(ChatId(55), UserId(55)).await;

        // then
        assert!(privileged);
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn is_privileged__group_member_status__decides() {
        // given
        let server = FakeHttpServer::start().await;
        let member = path("getChatMember");
        server.respond(
            &member,
            ScriptedResponse::ok(json!({ "ok": true, "result": { "status": "administrator" } })),
        );
        server.respond(
            &member,
            ScriptedResponse::ok(json!({ "ok": true, "result": { "status": "member" } })),
        );
        let client = client(&server);

        // when
        let admin = client.is_privileged(CHAT, UserId(1)).await;
        let regular = client.is_privileged(CHAT, UserId(2)).await;

        // then
        assert!(admin);
        assert!(!regular);
        let lookups = server.requests_to(&member);
        assert_eq!(lookups[1].body["user_id"], json!(2));
    }

    #[tokio::test]
    async fn is_privileged__lookup_fails__is_not_privileged() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            &path("getChatMember"),
            failed(400, "Bad Request: chat not found"),
        );
        let client = client(&server);

        // when
        let privileged = client.is_privileged(CHAT, UserId(1)).await;

        // then
        assert!(!privileged);
    }

    #[tokio::test]
    async fn bot_username__reads_get_me() {
        // given
        let server = FakeHttpServer::start().await;
        server.respond(
            &path("getMe"),
            ScriptedResponse::ok(json!({
                "ok": true,
                "result": { "id": 1, "is_bot": true, "username": "momentum_bot" },
            })),
        );
        let client = client(&server);

        // when
        let username = client.bot_username().await;

        // then
        assert_eq!(username, Ok(Some("momentum_bot".to_string())));
    }
}
