use switchyard_core::{Message, Result, RoutedMessage};

/// Builds the reply a worker sends for one request.
///
/// The returned message goes out as-is, so it must start with the request's
/// envelope; [`RoutedMessage::reply`] and [`RoutedMessage::to_message`] take
/// care of that.
pub trait Responder: Send + 'static {
    /// `reply_index` counts the replies already sent for this request.
    fn respond(&mut self, request: &RoutedMessage, reply_index: usize) -> Result<Message>;
}

/// Replies with the request itself, envelope and payload unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct Echo;

impl Responder for Echo {
    fn respond(&mut self, request: &RoutedMessage, _reply_index: usize) -> Result<Message> {
        Ok(request.to_message())
    }
}

impl<F> Responder for F
where
    F: FnMut(&RoutedMessage, usize) -> Result<Message> + Send + 'static,
{
    fn respond(&mut self, request: &RoutedMessage, reply_index: usize) -> Result<Message> {
        self(request, reply_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::{EnvelopeShape, Frame};

    fn request() -> RoutedMessage {
        let message =
            Message::new(vec![Frame::from("AAAA-0001"), Frame::from("request #3")]).unwrap();
        RoutedMessage::split(message, EnvelopeShape::SINGLE_HOP).unwrap()
    }

    #[test]
    fn echo_returns_the_request() {
        let reply = Echo.respond(&request(), 0).unwrap();
        assert_eq!(reply, request().to_message());
    }

    #[test]
    fn closures_are_responders() {
        let mut numbered =
            |req: &RoutedMessage, i: usize| req.reply([Frame::from(format!("reply {i}"))]);
        let reply = numbered.respond(&request(), 2).unwrap();
        assert_eq!(reply.first().to_string(), "AAAA-0001");
        assert_eq!(reply.last().to_string(), "reply 2");
    }
}
