use crate::{
    Result,
    app::command_source::{
        CommandSource,
        IncomingCommand,
    },
};
use actix_web::{
    App,
    HttpServer,
    dev::ServerHandle,
    error::ErrorInternalServerError,
    web,
};
use anyhow::{
    Context,
    anyhow,
};
use momentum_engine::{
    commands::Reply,
    model::{
        ChatId,
        UserId,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    net::TcpListener,
    thread::JoinHandle,
};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandRequest {
    pub chat_id: i64,
    pub user_id: i64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResponse {
    pub reply: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct HealthDto {
    status: String,
}

pub struct ActixCommandApi {
    receiver: mpsc::Receiver<IncomingCommand>,
    base_url: String,
    server_handle: ServerHandle,
    server_thread: Option<JoinHandle<()>>,
}

impl ActixCommandApi {
    pub async fn new(port: Option<u16>) -> Result<Self> {
        let (sender, receiver) = mpsc::channel(64);

        let listener = TcpListener::bind(("127.0.0.1", port.unwrap_or(0)))
            .context("failed to bind HTTP listener for command API")?;
        let address = listener
            .local_addr()
            .context("failed to read listener address")?;
        let base_url = format!("http://{}", address);

        tracing::info!("command API listening on {}", base_url);

        let server = HttpServer::new(move || {
            App::new()
                .app_data(web::Data::new(sender.clone()))
                .route("/command", web::post().to(handle_command))
                .route("/health", web::get().to(handle_health))
        })
        .listen(listener)
        .context("failed to start Actix server")?
        .run();

        let server_handle = server.handle();
        let server_thread = std::thread::spawn(move || {
            let sys = actix_web::rt::System::new();
            let _ = sys.block_on(server);
        });

        Ok(Self {
            receiver,
            base_url,
            server_handle,
            server_thread: Some(server_thread),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl CommandSource for ActixCommandApi {
    async fn next_command(&mut self) -> Result<IncomingCommand> {
        self.receiver
            .recv()
            .await
            .ok_or_else(|| anyhow!("command server closed"))
    }
}

impl Drop for ActixCommandApi {
    fn drop(&mut self) {
        let _ = self.server_handle.stop(true);
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

async fn handle_command(
    sender: web::Data<mpsc::Sender<IncomingCommand>>,
    request: web::Json<CommandRequest>,
) -> actix_web::Result<web::Json<CommandResponse>> {
    let CommandRequest {
        chat_id,
        user_id,
        text,
    } = request.into_inner();
    tracing::debug!(chat_id, user_id, "received command");
    let (command, reply) = IncomingCommand::new(ChatId(chat_id), UserId(user_id), text);

    sender
        .get_ref()
        .send(command)
        .await
        .map_err(|_| ErrorInternalServerError("unable to forward command"))?;

    let reply = reply
        .await
        .map_err(|_| ErrorInternalServerError("command responder dropped"))?;

    Ok(web::Json(CommandResponse {
        reply: match reply {
            Reply::Text(text) => Some(text),
            Reply::Ignored => None,
        },
    }))
}

async fn handle_health() -> web::Json<HealthDto> {
    web::Json(HealthDto {
        status: "ok".to_string(),
    })
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn next_command__forwards_request_and_returns_reply() {
        // given
        let mut api = ActixCommandApi::new(None).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/command", api.base_url());
        let request = CommandRequest {
            chat_id: -100,
            user_id: 7,
            text: "/pump".to_string(),
        };

        let client_task = tokio::spawn(async move {
            let response = client.post(url).json(&request).send().await.unwrap();
            response.json::<CommandResponse>().await.unwrap()
        });

        // when
        let command = api.next_command().await.unwrap();
        assert_eq!(command.chat, ChatId(-100));
        assert_eq!(command.user, UserId(7));
        assert_eq!(command.text, "/pump");
        command
            .respond
            .send(Reply::Text("📈 PUMP! Current result: +1".to_string()))
            .unwrap();

        // then
        let response = client_task.await.unwrap();
        assert_eq!(
            response,
            CommandResponse {
                reply: Some("📈 PUMP! Current result: +1".to_string())
            }
        );
    }

    #[tokio::test]
    async fn next_command__ignored_message__returns_empty_reply() {
        // given
        let mut api = ActixCommandApi::new(None).await.unwrap();
        let client = reqwest::Client::new();
        let url = format!("{}/command", api.base_url());
        let request = CommandRequest {
            chat_id: -100,
            user_id: 7,
            text: "hello".to_string(),
        };

        let client_task = tokio::spawn(async move {
            let response = client.post(url).json(&request).send().await.unwrap();
            response.json::<CommandResponse>().await.unwrap()
        });

        // when
        let command = api.next_command().await.unwrap();
        command.respond.send(Reply::Ignored).unwrap();

        // then
        let response = client_task.await.unwrap();
        assert_eq!(response, CommandResponse { reply: None });
    }

    #[tokio::test]
    async fn health__reports_ok() {
        // given
        let api = ActixCommandApi::new(None).await.unwrap();
        let url = format!("{}/health", api.base_url());

        // when
        let response = reqwest::get(url).await.unwrap();

        // then
        assert!(response.status().is_success());
        let body = response.json::<HealthDto>().await.unwrap();
        assert_eq!(body.status, "ok");
    }
}
