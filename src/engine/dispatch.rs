//! The dispatch state machine.
//!
//! One logical command is driven by a spawned task that loops over attempts:
//! acquire a connection, put the command on the wire, await the reply. The
//! acquire-and-write phase races a retry pacer; the response phase races a
//! response timer. Cluster redirects re-enter the loop with a new source
//! without consuming a retry attempt. The caller observes exactly one
//! terminal outcome through a single-assignment result channel, and dropping
//! the caller-side future cancels the in-flight attempt at its next
//! suspension point.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{sleep, Sleep};
use tracing::{debug, instrument};

use crate::cluster::errors::parse_redis_error;
use crate::core::command::{self, CommandInvocation, CommandSpec};
use crate::engine::provider::{ConnGuard, NodeConnection, ReplyHandle, WriteHandle};
use crate::engine::source::{NodeSource, Redirect};
use crate::engine::EngineShared;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// A reply frame stamped with the address of the node that produced it,
/// when known.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The reply value.
    pub frame: Frame,
    /// Address of the responding node.
    pub node: Option<String>,
}

impl Reply {
    /// Consumes the reply, returning the bare frame.
    pub fn into_frame(self) -> Frame {
        self.frame
    }

    pub(crate) fn null() -> Self {
        Self {
            frame: Frame::Null,
            node: None,
        }
    }
}

/// What a completed dispatch hands back through the result channel.
#[derive(Debug)]
pub(crate) struct DispatchOutput {
    pub(crate) frames: Vec<Frame>,
    pub(crate) node: Option<String>,
}

/// Caller-visible outcome of one logical command.
///
/// Stable across every retry and redirect underneath it. Exactly one of
/// success, failure, or cancellation is ever observed; dropping the future
/// cancels the in-flight attempt and releases any connection it acquired.
#[derive(Debug)]
pub struct CommandFuture {
    rx: oneshot::Receiver<Result<DispatchOutput>>,
}

impl Future for CommandFuture {
    type Output = Result<Reply>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(out))) => {
                let node = out.node;
                let frame = out.frames.into_iter().next().unwrap_or(Frame::Null);
                Poll::Ready(Ok(Reply { frame, node }))
            }
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Caller-visible outcome of one slot-bound atomic batch, one reply frame
/// per invocation in order.
#[derive(Debug)]
pub struct BatchFuture {
    rx: oneshot::Receiver<Result<DispatchOutput>>,
}

impl Future for BatchFuture {
    type Output = Result<Vec<Frame>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(Ok(out))) => Poll::Ready(Ok(out.frames)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(e)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Cancelled)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// What one dispatch sends: a single invocation or a slot-bound batch.
#[derive(Debug)]
pub(crate) enum Payload {
    Single(CommandInvocation),
    /// Spec snapshot of the first invocation plus the batch itself; batches
    /// are constructed non-empty.
    Batch(CommandSpec, Vec<CommandInvocation>),
}

impl Payload {
    pub(crate) fn batch(invs: Vec<CommandInvocation>) -> Option<Self> {
        let spec = *invs.first()?.spec();
        Some(Payload::Batch(spec, invs))
    }

    fn spec(&self) -> &CommandSpec {
        match self {
            Payload::Single(inv) => inv.spec(),
            Payload::Batch(spec, _) => spec,
        }
    }

    fn trailing_wait_secs(&self) -> Option<u64> {
        match self {
            Payload::Single(inv) => inv.trailing_wait_secs(),
            Payload::Batch(..) => None,
        }
    }

    /// Puts the payload on the wire. ASK redirects prime the batch with
    /// ASKING; the primer's reply is skipped during collection.
    fn send_on(
        &self,
        conn: &dyn NodeConnection,
        redirect: Redirect,
    ) -> (WriteHandle, Vec<ReplyHandle>, usize) {
        let mut invs: Vec<CommandInvocation> = Vec::new();
        let skip = if matches!(redirect, Redirect::Ask) {
            invs.push(command::asking());
            1
        } else {
            0
        };
        match self {
            Payload::Single(inv) if skip == 0 => {
                let (write, reply) = conn.send(inv.clone());
                return (write, vec![reply], 0);
            }
            Payload::Single(inv) => invs.push(inv.clone()),
            Payload::Batch(_, batch) => invs.extend(batch.iter().cloned()),
        }
        let (write, replies) = conn.send_batch(invs);
        (write, replies, skip)
    }
}

/// Spawns the retry loop for one logical command and returns its result
/// channel.
pub(crate) fn spawn_dispatch(
    shared: Arc<EngineShared>,
    readonly: bool,
    source: NodeSource,
    payload: Payload,
) -> oneshot::Receiver<Result<DispatchOutput>> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(run_dispatch(shared, readonly, source, payload, tx));
    rx
}

pub(crate) fn command_future(rx: oneshot::Receiver<Result<DispatchOutput>>) -> CommandFuture {
    CommandFuture { rx }
}

pub(crate) fn batch_future(rx: oneshot::Receiver<Result<DispatchOutput>>) -> BatchFuture {
    BatchFuture { rx }
}

pub(crate) fn resolved_batch(frames: Vec<Frame>) -> BatchFuture {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(Ok(DispatchOutput { frames, node: None }));
    BatchFuture { rx }
}

/// How one attempt ended, seen from the retry loop.
enum AttemptOutcome {
    /// Terminal: deliver to the caller.
    Complete(Result<DispatchOutput>),
    /// Re-dispatch at a new source without consuming a retry attempt.
    Redirect(NodeSource),
    /// The attempt was replaced; re-enter with `attempt + 1`, remembering
    /// the recorded error if any.
    Retry(Option<Error>),
    /// The caller went away; stop silently.
    Cancelled,
}

enum ResponseOutcome {
    Done(Result<Vec<Frame>>),
    Cancelled,
}

#[instrument(level = "debug", skip_all, fields(command = payload.spec().name(), readonly))]
async fn run_dispatch(
    shared: Arc<EngineShared>,
    readonly: bool,
    mut source: NodeSource,
    payload: Payload,
    mut tx: oneshot::Sender<Result<DispatchOutput>>,
) {
    let command = payload.spec().name();
    let mut attempt: u32 = 0;
    let mut last_error: Option<Error> = None;

    let outcome = loop {
        if tx.is_closed() {
            return;
        }

        let permit = match shared.gate.acquire() {
            Some(permit) => permit,
            None => break Err(Error::Shutdown),
        };

        match run_attempt(&shared, readonly, &source, &payload, permit, &mut tx).await {
            AttemptOutcome::Complete(result) => break result,
            AttemptOutcome::Redirect(next) => {
                debug!(command, from = %source, to = %next, "following redirect");
                source = next;
            }
            AttemptOutcome::Retry(err) => {
                if let Some(e) = err {
                    last_error = Some(e);
                }
                if attempt == shared.config.retry_attempts {
                    break Err(Error::RetryExhausted {
                        command: command.to_string(),
                        attempts: attempt,
                        cause: last_error.take().map(Box::new),
                    });
                }
                attempt += 1;
                debug!(attempt, command, "retrying command");
            }
            AttemptOutcome::Cancelled => return,
        }
    };

    // First writer wins; a caller that went away in the meantime simply
    // never observes this outcome.
    let _ = tx.send(outcome);
}

async fn run_attempt(
    shared: &Arc<EngineShared>,
    readonly: bool,
    source: &NodeSource,
    payload: &Payload,
    permit: crate::engine::shutdown::ShutdownPermit,
    tx: &mut oneshot::Sender<Result<DispatchOutput>>,
) -> AttemptOutcome {
    let spec = *payload.spec();
    let pacer = sleep(shared.config.retry_interval);
    tokio::pin!(pacer);

    let acquire = if readonly {
        shared.provider.acquire_read(source, &spec)
    } else {
        shared.provider.acquire_write(source, &spec)
    };

    // Phase 1: connection acquisition, raced against the retry pacer.
    let conn = tokio::select! {
        biased;
        _ = tx.closed() => return AttemptOutcome::Cancelled,
        res = acquire => match res {
            Ok(conn) => ConnGuard::new(
                shared.provider.clone(),
                readonly,
                source.clone(),
                conn,
                permit,
            ),
            Err(e) => {
                // The permit drops here; the pacer still spaces the retry.
                drop(permit);
                return pace_out(pacer, tx, Some(e)).await;
            }
        },
        _ = &mut pacer => return AttemptOutcome::Retry(None),
    };

    debug!(
        command = spec.name(),
        node = %conn.conn().addr(),
        source = %source,
        "acquired connection for command"
    );

    // Phase 2: write, still raced against the pacer. A write that completed
    // before the pacer fires always wins the race.
    let (write, replies, skip) = payload.send_on(conn.conn(), source.redirect());
    tokio::select! {
        biased;
        _ = tx.closed() => return AttemptOutcome::Cancelled,
        res = write.outcome(&spec) => {
            if let Err(e) = res {
                return pace_out(pacer, tx, Some(e)).await;
            }
        }
        _ = &mut pacer => return AttemptOutcome::Retry(None),
    }

    // Phase 3: the write is on the wire; the retry pacer is out of play and
    // the response timer takes over.
    let wait_secs = payload.trailing_wait_secs();
    let response_timeout = match wait_secs {
        Some(0) => None,
        Some(wait) => Some(shared.config.response_timeout + Duration::from_secs(wait)),
        None => Some(shared.config.response_timeout),
    };

    let result = match await_response(
        shared,
        &conn,
        &spec,
        replies,
        skip,
        wait_secs,
        response_timeout,
        tx,
    )
    .await
    {
        ResponseOutcome::Done(result) => result,
        ResponseOutcome::Cancelled => return AttemptOutcome::Cancelled,
    };

    // Phase 4: classify. Redirect-class errors never reach the caller.
    match result {
        Err(Error::Moved { slot, address }) => {
            AttemptOutcome::Redirect(NodeSource::moved(slot, address))
        }
        Err(Error::Ask { slot, address }) => {
            AttemptOutcome::Redirect(NodeSource::ask(slot, address))
        }
        Err(Error::Loading) => {
            debug!(command = spec.name(), source = %source, "node is loading, re-dispatching");
            AttemptOutcome::Redirect(source.clone())
        }
        Ok(frames) => {
            let node = source
                .address()
                .map(str::to_string)
                .or_else(|| Some(conn.conn().addr()));
            AttemptOutcome::Complete(Ok(DispatchOutput { frames, node }))
        }
        Err(e) => AttemptOutcome::Complete(Err(e)),
    }
    // The guard drops here: connection and permit released exactly once,
    // after attempt resolution.
}

/// Waits out the remainder of the retry pacing interval, remembering the
/// error the attempt recorded.
async fn pace_out(
    mut pacer: Pin<&mut Sleep>,
    tx: &mut oneshot::Sender<Result<DispatchOutput>>,
    err: Option<Error>,
) -> AttemptOutcome {
    tokio::select! {
        biased;
        _ = tx.closed() => AttemptOutcome::Cancelled,
        _ = &mut pacer => AttemptOutcome::Retry(err),
    }
}

/// The response phase: reply collection raced against the response timer,
/// with blocking-command supervision layered on top.
#[allow(clippy::too_many_arguments)]
async fn await_response(
    shared: &Arc<EngineShared>,
    conn: &ConnGuard,
    spec: &CommandSpec,
    replies: Vec<ReplyHandle>,
    skip: usize,
    wait_secs: Option<u64>,
    response_timeout: Option<Duration>,
    tx: &mut oneshot::Sender<Result<DispatchOutput>>,
) -> ResponseOutcome {
    let blocking = wait_secs.is_some();
    let epoch = conn.conn().epoch();

    let mut shutdown_rx = shared.gate.subscribe();
    if blocking && *shutdown_rx.borrow_and_update() {
        conn.conn().force_reconnect();
        return ResponseOutcome::Done(Err(Error::Shutdown));
    }

    let collect = collect_replies(replies, skip);
    tokio::pin!(collect);

    let deadline = async {
        match response_timeout {
            Some(timeout) => sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    // Watchdog for blocking commands: fires once at the server-side wait
    // duration to detect a wait lost to a reconnected or dead channel.
    let mut watchdog_armed = wait_secs.is_some_and(|w| w > 0);
    let watchdog = async {
        match wait_secs {
            Some(wait) if wait > 0 => sleep(Duration::from_secs(wait)).await,
            _ => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            biased;
            _ = tx.closed() => {
                if blocking {
                    // The server still holds the wait; drop command
                    // correlation and rebuild the channel.
                    conn.conn().abandon_pending();
                    conn.conn().force_reconnect();
                }
                return ResponseOutcome::Cancelled;
            }
            out = &mut collect => return ResponseOutcome::Done(out),
            _ = shutdown_rx.changed(), if blocking => {
                conn.conn().force_reconnect();
                return ResponseOutcome::Done(Err(Error::Shutdown));
            }
            _ = &mut watchdog, if watchdog_armed => {
                watchdog_armed = false;
                if conn.conn().epoch() != epoch || !conn.conn().is_active() {
                    // The wait died with the old channel; the server would
                    // have answered null at this deadline.
                    debug!(
                        command = spec.name(),
                        "blocking wait lost its connection, resolving empty"
                    );
                    conn.conn().force_reconnect();
                    return ResponseOutcome::Done(Ok(vec![Frame::Null]));
                }
            }
            _ = &mut deadline => {
                return ResponseOutcome::Done(Err(Error::ResponseTimeout {
                    command: spec.name().to_string(),
                    timeout: response_timeout.unwrap_or_default(),
                }));
            }
        }
    }
}

/// Awaits every reply in order, discarding the first `skip` (ASKING primer)
/// and classifying error frames.
async fn collect_replies(replies: Vec<ReplyHandle>, skip: usize) -> Result<Vec<Frame>> {
    let mut frames = Vec::with_capacity(replies.len().saturating_sub(skip));
    for (idx, handle) in replies.into_iter().enumerate() {
        let frame = handle.reply().await?;
        if idx < skip {
            continue;
        }
        match frame {
            Frame::Error(msg) => return Err(parse_redis_error(&msg)),
            frame => frames.push(frame),
        }
    }
    Ok(frames)
}
