use crate::pool::policy::ReplyPolicy;
use crate::pool::responder::Responder;
use crate::telemetry::increment_requests_handled;
use crate::transport::Endpoint;
use rand::rngs::StdRng;
use switchyard_core::{EnvelopeShape, RoutedMessage};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Per-worker behaviour, shared by every worker of a pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerConfig {
    pub envelope: EnvelopeShape,
    pub policy: ReplyPolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub requests: u64,
    pub replies: u64,
    /// Requests too short for the configured envelope.
    pub malformed: u64,
    /// Replies the responder or the transport failed to produce or send.
    pub failed_replies: u64,
}

/// Worker task: receive one request, send its replies, repeat.
///
/// Requests are handled strictly one at a time. Every reply of a request is
/// sent before the next request is received, so a request arriving during
/// the reply delays simply waits in the endpoint's queue.
///
/// # Arguments
///
/// - `worker_id`: Position in the pool, for logs.
/// - `endpoint`: A dealer connected to the broker backend.
/// - `responder`: Builds each reply.
/// - `config`: Envelope shape and reply policy.
/// - `rng`: Source for reply counts and delays; seed it for reproducible runs.
/// - `shutdown`: Cancelling it ends the loop at the next wait, abandoning any
///   replies not yet sent.
pub async fn worker_loop<R: Responder>(
    worker_id: usize,
    mut endpoint: Endpoint,
    mut responder: R,
    config: WorkerConfig,
    mut rng: StdRng,
    shutdown: CancellationToken,
) -> WorkerStats {
    trace!(worker_id, "worker started");
    let mut stats = WorkerStats::default();

    'requests: loop {
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = endpoint.receive() => received,
        };
        let message = match received {
            Ok(message) => message,
            Err(e) if e.is_terminal() => break,
            Err(e) => {
                warn!(worker_id, error = %e, "receive failed");
                continue;
            }
        };
        let request = match RoutedMessage::split(message, config.envelope) {
            Ok(request) => request,
            Err(e) => {
                stats.malformed += 1;
                warn!(worker_id, error = %e, "discarding malformed request");
                continue;
            }
        };
        stats.requests += 1;
        increment_requests_handled();

        let replies = config.policy.sample_replies(&mut rng);
        debug!(
            worker_id,
            client = ?request.envelope().identity(),
            body = %request.body(),
            replies,
            "handling request"
        );

        for reply_index in 0..replies {
            let delay = config.policy.sample_delay(&mut rng);
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(worker_id, remaining = replies - reply_index, "abandoning replies");
                    break 'requests;
                }
                () = sleep(delay) => {}
            }

            let reply = match responder.respond(&request, reply_index) {
                Ok(reply) => reply,
                Err(e) => {
                    stats.failed_replies += 1;
                    warn!(worker_id, error = %e, "responder failed");
                    continue;
                }
            };
            let sent = tokio::select! {
                biased;
                () = shutdown.cancelled() => break 'requests,
                sent = endpoint.send(reply) => sent,
            };
            match sent {
                Ok(()) => stats.replies += 1,
                Err(e) if e.is_terminal() => break 'requests,
                Err(e) => {
                    stats.failed_replies += 1;
                    warn!(worker_id, error = %e, "reply not sent");
                }
            }
        }
    }

    trace!(worker_id, ?stats, "worker stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Context;
    use core::time::Duration;
    use rand::SeedableRng;
    use switchyard_core::{Frame, Message, SocketType};

    #[tokio::test(start_paused = true)]
    async fn replies_to_a_request_before_taking_the_next() {
        let ctx = Context::new();
        let mut backend = ctx.socket(SocketType::Dealer);
        backend.bind("inproc://worker-seq").await.unwrap();
        let mut endpoint = ctx.socket(SocketType::Dealer);
        endpoint.connect("inproc://worker-seq").await.unwrap();

        let shutdown = CancellationToken::new();
        let config = WorkerConfig {
            envelope: EnvelopeShape::SINGLE_HOP,
            policy: ReplyPolicy::fixed(3, Duration::from_millis(10)),
        };
        let worker = tokio::spawn(worker_loop(
            0,
            endpoint,
            |req: &RoutedMessage, i: usize| req.reply([Frame::from(format!("{}/{i}", req.body()))]),
            config,
            StdRng::seed_from_u64(1),
            shutdown.clone(),
        ));

        for request in ["A", "B"] {
            backend
                .send(Message::new(vec![Frame::from("AAAA-0001"), Frame::from(request)]).unwrap())
                .await
                .unwrap();
        }

        let mut bodies = Vec::new();
        for _ in 0..6 {
            let reply = backend.receive().await.unwrap();
            assert_eq!(reply.first().to_string(), "AAAA-0001");
            bodies.push(reply.last().to_string());
        }
        assert_eq!(bodies, ["A/0", "A/1", "A/2", "B/0", "B/1", "B/2"]);

        shutdown.cancel();
        let stats = worker.await.unwrap();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.replies, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_requests_are_skipped() {
        let ctx = Context::new();
        let mut backend = ctx.socket(SocketType::Dealer);
        backend.bind("inproc://worker-bad").await.unwrap();
        let mut endpoint = ctx.socket(SocketType::Dealer);
        endpoint.connect("inproc://worker-bad").await.unwrap();

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker_loop(
            0,
            endpoint,
            crate::pool::Echo,
            WorkerConfig {
                envelope: EnvelopeShape::SINGLE_HOP,
                policy: ReplyPolicy::fixed(1, Duration::ZERO),
            },
            StdRng::seed_from_u64(2),
            shutdown.clone(),
        ));

        backend.send(Message::from("no envelope")).await.unwrap();
        backend
            .send(Message::new(vec![Frame::from("AAAA-0002"), Frame::from("ok")]).unwrap())
            .await
            .unwrap();
        let reply = backend.receive().await.unwrap();
        assert_eq!(reply.last().to_string(), "ok");

        shutdown.cancel();
        let stats = worker.await.unwrap();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.requests, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_pending_replies() {
        let ctx = Context::new();
        let mut backend = ctx.socket(SocketType::Dealer);
        backend.bind("inproc://worker-stop").await.unwrap();
        let mut endpoint = ctx.socket(SocketType::Dealer);
        endpoint.connect("inproc://worker-stop").await.unwrap();

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(worker_loop(
            0,
            endpoint,
            crate::pool::Echo,
            WorkerConfig {
                envelope: EnvelopeShape::SINGLE_HOP,
                policy: ReplyPolicy::fixed(5, Duration::from_secs(60)),
            },
            StdRng::seed_from_u64(3),
            shutdown.clone(),
        ));
        backend
            .send(Message::new(vec![Frame::from("AAAA-0003"), Frame::from("slow")]).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(90)).await;

        shutdown.cancel();
        let stats = worker.await.unwrap();
        assert_eq!(stats.requests, 1);
        assert_eq!(stats.replies, 1);
        assert_eq!(backend.queued(), 1);
    }
}
