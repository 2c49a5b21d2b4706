//! Per-invocation context handed to a stage.
//!
//! A stage never touches its neighbours. It records what it wants to happen
//! next (forward, write, close) and the pipeline carries the actions out in
//! the order they were recorded once the stage returns.

use crate::runtime::message::Message;

/// Propagation direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Transport toward application, front to back.
    Inbound,
    /// Application toward transport, back to front.
    Outbound,
}

/// Where an outbound write enters the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Nearest outbound-capable stage before the writer.
    Here,
    /// Last outbound-capable stage in the chain.
    Tail,
}

#[derive(Debug)]
pub(crate) enum Action {
    Forward(Message),
    Write { message: Message, origin: WriteOrigin },
    Close,
}

/// Recorder for the actions of one stage invocation.
#[derive(Debug, Default)]
pub struct StageContext {
    actions: Vec<Action>,
}

impl StageContext {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Pass a unit on in the current direction.
    pub fn forward(&mut self, message: Message) {
        self.actions.push(Action::Forward(message));
    }

    /// Write a unit starting just before this stage.
    pub fn write(&mut self, message: Message) -> WriteHandle<'_> {
        self.push_write(message, WriteOrigin::Here)
    }

    /// Write a unit through every outbound stage, starting at the tail.
    pub fn write_from_tail(&mut self, message: Message) -> WriteHandle<'_> {
        self.push_write(message, WriteOrigin::Tail)
    }

    /// Close the connection after everything queued so far is flushed.
    pub fn close(&mut self) {
        self.actions.push(Action::Close);
    }

    fn push_write(&mut self, message: Message, origin: WriteOrigin) -> WriteHandle<'_> {
        self.actions.push(Action::Write { message, origin });
        WriteHandle { ctx: self }
    }

    pub(crate) fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

/// Completion handle for a write.
///
/// Scheduling a close through the handle queues it directly behind the
/// bytes the write produces, so the transport closes only after they are
/// flushed.
pub struct WriteHandle<'a> {
    ctx: &'a mut StageContext,
}

impl WriteHandle<'_> {
    /// Close the connection once this write has been flushed.
    pub fn close_on_flush(self) {
        self.ctx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_actions_keep_order() {
        let mut ctx = StageContext::new();
        ctx.forward(Message::Frame(Bytes::from_static(b"a")));
        ctx.write(Message::Bytes(Bytes::from_static(b"b")))
            .close_on_flush();
        ctx.write_from_tail(Message::Bytes(Bytes::from_static(b"c")));

        let actions = ctx.into_actions();
        assert_eq!(actions.len(), 4);
        assert!(matches!(actions[0], Action::Forward(Message::Frame(_))));
        assert!(matches!(
            actions[1],
            Action::Write {
                origin: WriteOrigin::Here,
                ..
            }
        ));
        assert!(matches!(actions[2], Action::Close));
        assert!(matches!(
            actions[3],
            Action::Write {
                origin: WriteOrigin::Tail,
                ..
            }
        ));
    }
}
