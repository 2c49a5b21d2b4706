//! Request aggregation.
//!
//! Collects a `Head`, its `Content` fragments and the closing `Last` into a
//! single [`FullRequest`], so stages further back only ever see complete
//! requests.

use super::message::{FullRequest, FullResponse, HttpObject, RequestHead, Status};
use crate::runtime::{Message, PipelineError, StageContext};
use bytes::BytesMut;
use tracing::{debug, warn};

/// Default aggregation limit in bytes.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 65536;

#[derive(Debug)]
pub struct HttpAggregator {
    max_content_length: usize,
    in_flight: Option<(RequestHead, BytesMut)>,
    /// Set after a rejection; fragments up to the next `Last` are dropped.
    discarding: bool,
}

impl Default for HttpAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTENT_LENGTH)
    }
}

impl HttpAggregator {
    pub fn new(max_content_length: usize) -> Self {
        Self {
            max_content_length,
            in_flight: None,
            discarding: false,
        }
    }

    /// Bytes of the request currently being aggregated.
    pub fn buffered(&self) -> usize {
        self.in_flight.as_ref().map_or(0, |(_, body)| body.len())
    }

    pub fn release(&mut self) -> usize {
        let discarded = self.buffered();
        self.in_flight = None;
        self.discarding = false;
        discarded
    }

    pub(crate) fn on_inbound(
        &mut self,
        ctx: &mut StageContext,
        message: Message,
    ) -> Result<(), PipelineError> {
        match message {
            Message::Http(HttpObject::Head(head)) => self.on_head(ctx, head),
            Message::Http(HttpObject::Content(chunk)) => {
                if self.discarding {
                    return Ok(());
                }
                let Some((_, body)) = self.in_flight.as_mut() else {
                    ctx.forward(Message::Http(HttpObject::Content(chunk)));
                    return Ok(());
                };
                if body.len() + chunk.len() > self.max_content_length {
                    debug!(
                        buffered = body.len(),
                        chunk = chunk.len(),
                        max = self.max_content_length,
                        "Request body exceeds aggregation limit"
                    );
                    self.in_flight = None;
                    self.discarding = true;
                    reject(ctx, Status::REQUEST_ENTITY_TOO_LARGE);
                    return Ok(());
                }
                body.extend_from_slice(&chunk);
            }
            Message::Http(HttpObject::Last { trailers }) => {
                if self.discarding {
                    self.discarding = false;
                    return Ok(());
                }
                let Some((mut head, body)) = self.in_flight.take() else {
                    ctx.forward(Message::Http(HttpObject::Last { trailers }));
                    return Ok(());
                };
                head.headers.remove("transfer-encoding");
                head.headers.insert("content-length", body.len().to_string());
                ctx.forward(Message::Request(FullRequest {
                    head,
                    body: body.freeze(),
                    trailers,
                }));
            }
            other => ctx.forward(other),
        }
        Ok(())
    }

    fn on_head(&mut self, ctx: &mut StageContext, mut head: RequestHead) {
        if self.in_flight.take().is_some() {
            warn!("New request head before the previous request completed");
        }
        self.discarding = false;

        let declared = head.content_length();
        let too_large = declared.is_some_and(|len| len > self.max_content_length as u64);

        if let Some(expect) = head.headers.get("expect") {
            if !expect.trim().eq_ignore_ascii_case("100-continue") {
                debug!(expect, "Unsupported expectation");
                self.discarding = true;
                ctx.write(Message::Response(FullResponse::empty(
                    Status::EXPECTATION_FAILED,
                )));
                return;
            }
            if too_large {
                self.discarding = true;
                reject(ctx, Status::EXPECTATION_FAILED);
                return;
            }
            ctx.write(Message::Response(FullResponse::empty(Status::CONTINUE)));
            head.headers.remove("expect");
        } else if too_large {
            debug!(
                declared = declared.unwrap_or_default(),
                max = self.max_content_length,
                "Declared Content-Length exceeds aggregation limit"
            );
            self.discarding = true;
            reject(ctx, Status::REQUEST_ENTITY_TOO_LARGE);
            return;
        }

        self.in_flight = Some((head, BytesMut::new()));
    }
}

/// Answer with an empty error response and close once it is flushed.
fn reject(ctx: &mut StageContext, status: Status) {
    let mut response = FullResponse::empty(status);
    response.headers.insert("connection", "close");
    ctx.write(Message::Response(response)).close_on_flush();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::http::message::{Headers, Version};
    use crate::runtime::context::Action;
    use bytes::Bytes;

    fn head(headers: &[(&str, &str)]) -> RequestHead {
        let mut map = Headers::new();
        for (name, value) in headers {
            map.append(*name, *value);
        }
        RequestHead {
            method: "POST".into(),
            uri: "/submit".into(),
            version: Version::Http11,
            headers: map,
        }
    }

    fn feed(aggregator: &mut HttpAggregator, object: HttpObject) -> Vec<Action> {
        let mut ctx = StageContext::new();
        aggregator
            .on_inbound(&mut ctx, Message::Http(object))
            .unwrap();
        ctx.into_actions()
    }

    fn written_status(actions: &[Action]) -> Option<u16> {
        actions.iter().find_map(|a| match a {
            Action::Write {
                message: Message::Response(r),
                ..
            } => Some(r.status.code()),
            _ => None,
        })
    }

    #[test]
    fn test_aggregates_fragments() {
        let mut aggregator = HttpAggregator::new(64);
        assert!(feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Transfer-Encoding", "chunked")]))
        )
        .is_empty());
        assert!(feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"hel"))).is_empty());
        assert!(feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"lo"))).is_empty());
        assert_eq!(aggregator.buffered(), 5);

        let mut trailers = Headers::new();
        trailers.append("X-Sum", "1");
        let actions = feed(&mut aggregator, HttpObject::Last { trailers });

        match &actions[..] {
            [Action::Forward(Message::Request(request))] => {
                assert_eq!(request.body(), &Bytes::from_static(b"hello"));
                assert_eq!(request.headers().get("content-length"), Some("5"));
                assert!(!request.headers().contains("transfer-encoding"));
                assert_eq!(request.trailers.get("x-sum"), Some("1"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(aggregator.buffered(), 0);
    }

    #[test]
    fn test_continue_is_sent_for_acceptable_expectation() {
        let mut aggregator = HttpAggregator::new(64);
        let actions = feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Expect", "100-continue"), ("Content-Length", "3")])),
        );
        assert_eq!(written_status(&actions), Some(100));
        assert!(!actions.iter().any(|a| matches!(a, Action::Close)));

        feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"abc")));
        let actions = feed(
            &mut aggregator,
            HttpObject::Last {
                trailers: Headers::new(),
            },
        );
        match &actions[..] {
            [Action::Forward(Message::Request(request))] => {
                assert!(!request.headers().contains("expect"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_oversized_expectation_is_refused() {
        let mut aggregator = HttpAggregator::new(4);
        let actions = feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Expect", "100-continue"), ("Content-Length", "10")])),
        );
        assert_eq!(written_status(&actions), Some(417));
        assert!(matches!(actions.last(), Some(Action::Close)));
    }

    #[test]
    fn test_unknown_expectation() {
        let mut aggregator = HttpAggregator::new(64);
        let actions = feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Expect", "something-else")])),
        );
        assert_eq!(written_status(&actions), Some(417));

        // The rejected request's body never reaches later stages.
        assert!(feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"x"))).is_empty());
        assert!(feed(
            &mut aggregator,
            HttpObject::Last {
                trailers: Headers::new()
            }
        )
        .is_empty());
    }

    #[test]
    fn test_declared_length_over_limit() {
        let mut aggregator = HttpAggregator::new(4);
        let actions = feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Content-Length", "5")])),
        );
        assert_eq!(written_status(&actions), Some(413));
        assert!(matches!(actions.last(), Some(Action::Close)));
    }

    #[test]
    fn test_body_overflow() {
        let mut aggregator = HttpAggregator::new(4);
        feed(
            &mut aggregator,
            HttpObject::Head(head(&[("Transfer-Encoding", "chunked")])),
        );
        assert!(feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"abcd"))).is_empty());

        let actions = feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"e")));
        assert_eq!(written_status(&actions), Some(413));
        assert!(matches!(actions.last(), Some(Action::Close)));
        assert_eq!(aggregator.buffered(), 0);
    }

    #[test]
    fn test_stray_fragments_pass_through() {
        let mut aggregator = HttpAggregator::new(4);
        let actions = feed(&mut aggregator, HttpObject::Content(Bytes::from_static(b"x")));
        assert!(matches!(
            &actions[..],
            [Action::Forward(Message::Http(HttpObject::Content(_)))]
        ));
    }
}
