//! Echo responder stage.

use crate::protocols::http::{FullRequest, FullResponse, Status};
use crate::runtime::{Message, PipelineError, StageContext};
use chrono::Utc;
use tracing::debug;

/// IMF-fixdate, the format of the HTTP `Date` header.
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Writes every frame back and answers every request.
#[derive(Debug)]
pub struct EchoResponder {
    close_after_reply: bool,
}

impl Default for EchoResponder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EchoResponder {
    pub fn new(close_after_reply: bool) -> Self {
        Self { close_after_reply }
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Frame(data) | Message::Bytes(data) => {
                debug!(len = data.len(), "Echoing frame");
                let write = ctx.write(Message::Bytes(data));
                if self.close_after_reply {
                    write.close_on_flush();
                }
            }
            Message::Request(request) => {
                debug!(
                    method = %request.method(),
                    uri = %request.uri(),
                    body = request.body().len(),
                    "Answering request"
                );
                ctx.write(Message::Response(describe(&request)))
                    .close_on_flush();
            }
            other => ctx.forward(other),
        }
        Ok(())
    }
}

/// Build the plain-text reply describing a request.
pub fn describe(request: &FullRequest) -> FullResponse {
    let body = format!(
        "Receive Http Request , url : {} , method:{} ,content : {}",
        request.uri(),
        request.method(),
        String::from_utf8_lossy(request.body())
    );

    let mut response = FullResponse::new(Status::OK, body);
    response
        .headers
        .insert("content-type", "text/plain; charset=UTF-8");
    response.headers.insert("connection", "close");
    response
        .headers
        .insert("date", Utc::now().format(HTTP_DATE_FORMAT).to_string());
    response
}
