//! Pull-based, suspendable sequence protocol.
//!
//! Every expression produces an [`XdmSequenceStream`]: callers pull items one
//! at a time through [`SequenceCursor::next_step`]. Suspension is a value, not
//! a control-flow effect: when a producer needs an external resolution it
//! returns [`IterationStep::Pending`] carrying an awaitable, and the next pull
//! after the awaitable resolves continues exactly where the producer left off.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::{XdmItem, XdmSequence};

/// Opaque handle the driver awaits before pulling again.
pub type Awaitable = BoxFuture<'static, ()>;

/// A shareable in-flight resolution. The producer keeps one handle to read the
/// value from; the awaitable handed to the driver is another.
pub type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, Error>>>;

/// Result of asking the navigation capability for a structural relation.
pub enum Fetch<T: Clone> {
    Ready(T),
    Pending(SharedFetch<T>),
}

impl<T: Clone + Send + Sync + 'static> Fetch<T> {
    /// Wrap a future resolution.
    pub fn pending(fut: BoxFuture<'static, Result<T, Error>>) -> Self {
        Fetch::Pending(fut.shared())
    }
}

/// Outcome of driving a suspendable operation one step.
pub enum Resolved<T> {
    Now(T),
    Later(Awaitable),
}

pub(crate) fn awaitable_of<T>(sh: &SharedFetch<T>) -> Awaitable
where
    T: Clone + Send + Sync + 'static,
{
    let f = sh.clone();
    Box::pin(async move {
        let _ = f.await;
    })
}

/// Resolve a fetch without blocking: either the value is available now, or the
/// caller must await and retry the enclosing operation. Retrying is productive
/// because navigators answer `Ready` for already-resolved relations.
pub(crate) fn fetch_now<T>(f: Fetch<T>) -> Result<Resolved<T>, Error>
where
    T: Clone + Send + Sync + 'static,
{
    match f {
        Fetch::Ready(v) => Ok(Resolved::Now(v)),
        Fetch::Pending(sh) => match sh.clone().now_or_never() {
            Some(res) => Ok(Resolved::Now(res?)),
            None => Ok(Resolved::Later(awaitable_of(&sh))),
        },
    }
}

/// One in-flight fetch owned by a cursor, so the cursor resumes from the same
/// resolution instead of re-issuing it.
pub(crate) enum FetchSlot<T: Clone> {
    Idle,
    Waiting(SharedFetch<T>),
}

impl<T: Clone + Send + Sync + 'static> FetchSlot<T> {
    /// Drive a fetch across suspensions. `start` is only invoked when no fetch
    /// is in flight.
    pub(crate) fn poll_with(
        &mut self,
        start: impl FnOnce() -> Fetch<T>,
    ) -> Result<Resolved<T>, Error> {
        if let FetchSlot::Waiting(sh) = self {
            return match sh.clone().now_or_never() {
                Some(res) => {
                    let v = res;
                    *self = FetchSlot::Idle;
                    Ok(Resolved::Now(v?))
                }
                // The driver polled again before the awaitable resolved; hand
                // out another awaitable for the same resolution.
                None => Ok(Resolved::Later(awaitable_of(sh))),
            };
        }
        match start() {
            Fetch::Ready(v) => Ok(Resolved::Now(v)),
            Fetch::Pending(sh) => {
                let aw = awaitable_of(&sh);
                *self = FetchSlot::Waiting(sh);
                Ok(Resolved::Later(aw))
            }
        }
    }
}

/// One step of iteration.
pub enum IterationStep<N> {
    Ready(XdmItem<N>),
    Pending(Awaitable),
    Done,
}

/// Cardinality a producer can advertise without being drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Empty,
    Singleton,
    Multiple,
}

/// Cardinality-based dispatch outcome; `Default` means the length is not
/// statically decidable for this producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardinalityCase {
    Empty,
    Singleton,
    Multiple,
    Default,
}

/// A pull-based producer of items.
///
/// Contract: after a call returned `Done`, later calls also return `Done`;
/// after `Pending(awaitable)` the caller awaits before pulling again and the
/// producer resumes in place, neither skipping nor repeating an item. A
/// raised error ends the contract (fail-fast, not retried).
pub trait SequenceCursor<N>: Send {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error>;

    /// Exact cardinality when statically known to this producer.
    fn cardinality_hint(&self) -> Option<Cardinality> {
        None
    }
}

struct VecCursor<N> {
    items: std::vec::IntoIter<XdmItem<N>>,
    hint: Cardinality,
}

impl<N: Send + Sync + 'static> SequenceCursor<N> for VecCursor<N> {
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        Ok(match self.items.next() {
            Some(it) => IterationStep::Ready(it),
            None => IterationStep::Done,
        })
    }

    fn cardinality_hint(&self) -> Option<Cardinality> {
        Some(self.hint)
    }
}

struct MapCursor<N, F> {
    inner: XdmSequenceStream<N>,
    f: F,
}

impl<N, F> SequenceCursor<N> for MapCursor<N, F>
where
    N: Send + Sync + 'static,
    F: FnMut(XdmItem<N>) -> Result<XdmItem<N>, Error> + Send,
{
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        match self.inner.next_step()? {
            IterationStep::Ready(it) => Ok(IterationStep::Ready((self.f)(it)?)),
            IterationStep::Pending(aw) => Ok(IterationStep::Pending(aw)),
            IterationStep::Done => Ok(IterationStep::Done),
        }
    }

    fn cardinality_hint(&self) -> Option<Cardinality> {
        self.inner.cardinality_hint()
    }
}

/// An ordered, lazily produced sequence of items.
///
/// The stream owns no external state of its own; all suspension state lives in
/// the cursor it wraps. Abandoning a stream mid-iteration is always safe.
pub struct XdmSequenceStream<N> {
    cursor: Box<dyn SequenceCursor<N>>,
    done: bool,
}

impl<N> std::fmt::Debug for XdmSequenceStream<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XdmSequenceStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<N: Send + Sync + 'static> XdmSequenceStream<N> {
    pub fn from_cursor(cursor: impl SequenceCursor<N> + 'static) -> Self {
        Self {
            cursor: Box::new(cursor),
            done: false,
        }
    }

    pub fn empty() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn singleton(item: XdmItem<N>) -> Self {
        Self::from_vec(vec![item])
    }

    pub fn from_vec(items: XdmSequence<N>) -> Self {
        let hint = match items.len() {
            0 => Cardinality::Empty,
            1 => Cardinality::Singleton,
            _ => Cardinality::Multiple,
        };
        Self::from_cursor(VecCursor {
            items: items.into_iter(),
            hint,
        })
    }

    /// Pull the next step. Pulling past `Done` stays `Done` regardless of the
    /// underlying cursor.
    pub fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        if self.done {
            return Ok(IterationStep::Done);
        }
        let step = self.cursor.next_step()?;
        if matches!(step, IterationStep::Done) {
            self.done = true;
        }
        Ok(step)
    }

    pub fn cardinality_hint(&self) -> Option<Cardinality> {
        if self.done {
            return Some(Cardinality::Empty);
        }
        self.cursor.cardinality_hint()
    }

    /// Cardinality-based classification without draining. `Default` when the
    /// producer does not advertise its length.
    pub fn classify(&self) -> CardinalityCase {
        match self.cardinality_hint() {
            Some(Cardinality::Empty) => CardinalityCase::Empty,
            Some(Cardinality::Singleton) => CardinalityCase::Singleton,
            Some(Cardinality::Multiple) => CardinalityCase::Multiple,
            None => CardinalityCase::Default,
        }
    }

    /// Lazy per-item mapping; suspension and errors of the underlying producer
    /// propagate unchanged.
    pub fn map_items<F>(self, f: F) -> Self
    where
        F: FnMut(XdmItem<N>) -> Result<XdmItem<N>, Error> + Send + 'static,
    {
        Self::from_cursor(MapCursor { inner: self, f })
    }

    /// Drain the stream eagerly, awaiting any suspensions.
    pub async fn collect_all(mut self) -> Result<XdmSequence<N>, Error> {
        let mut out = Vec::new();
        loop {
            match self.next_step()? {
                IterationStep::Ready(it) => out.push(it),
                IterationStep::Pending(aw) => aw.await,
                IterationStep::Done => return Ok(out),
            }
        }
    }

    /// Drain the stream synchronously. Fails with `ASYN0001` if the producer
    /// suspends; hosts with asynchronous navigators use [`Self::collect_all`].
    pub fn materialize(mut self) -> Result<XdmSequence<N>, Error> {
        let mut out = Vec::new();
        loop {
            match self.next_step()? {
                IterationStep::Ready(it) => out.push(it),
                IterationStep::Pending(_) => {
                    return Err(Error::from_code(
                        ErrorCode::ASYN0001,
                        "sequence suspended during synchronous evaluation",
                    ));
                }
                IterationStep::Done => return Ok(out),
            }
        }
    }
}

/// A producer whose semantics genuinely require full materialization of its
/// input (`count`, cardinality checks, joins): drains the inner stream,
/// suspending transparently, then emits the transformed result.
pub struct CollectingCursor<N, F> {
    stage: CollectStage<N, F>,
}

enum CollectStage<N, F> {
    Draining(Collector<N>, F),
    Emitting(std::vec::IntoIter<XdmItem<N>>),
    Finished,
}

impl<N: Send + Sync + 'static, F> CollectingCursor<N, F>
where
    F: FnOnce(XdmSequence<N>) -> Result<XdmSequence<N>, Error> + Send,
{
    pub fn new(input: XdmSequenceStream<N>, f: F) -> Self {
        Self {
            stage: CollectStage::Draining(Collector::new(input), f),
        }
    }
}

impl<N: Send + Sync + 'static, F> SequenceCursor<N> for CollectingCursor<N, F>
where
    F: FnOnce(XdmSequence<N>) -> Result<XdmSequence<N>, Error> + Send,
{
    fn next_step(&mut self) -> Result<IterationStep<N>, Error> {
        loop {
            match &mut self.stage {
                CollectStage::Draining(collector, _) => match collector.drive()? {
                    Resolved::Later(aw) => return Ok(IterationStep::Pending(aw)),
                    Resolved::Now(()) => {
                        let stage =
                            std::mem::replace(&mut self.stage, CollectStage::Finished);
                        let CollectStage::Draining(collector, f) = stage else {
                            unreachable!()
                        };
                        let out = f(collector.into_items())?;
                        self.stage = CollectStage::Emitting(out.into_iter());
                    }
                },
                CollectStage::Emitting(iter) => match iter.next() {
                    Some(it) => return Ok(IterationStep::Ready(it)),
                    None => {
                        self.stage = CollectStage::Finished;
                        return Ok(IterationStep::Done);
                    }
                },
                CollectStage::Finished => return Ok(IterationStep::Done),
            }
        }
    }
}

/// Incremental eager drain that survives suspension: `drive` buffers items
/// until the producer suspends or finishes, and can be called again after the
/// awaitable resolves.
pub struct Collector<N> {
    stream: XdmSequenceStream<N>,
    buf: XdmSequence<N>,
}

impl<N: Send + Sync + 'static> Collector<N> {
    pub fn new(stream: XdmSequenceStream<N>) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub fn drive(&mut self) -> Result<Resolved<()>, Error> {
        loop {
            match self.stream.next_step()? {
                IterationStep::Ready(it) => self.buf.push(it),
                IterationStep::Pending(aw) => return Ok(Resolved::Later(aw)),
                IterationStep::Done => return Ok(Resolved::Now(())),
            }
        }
    }

    pub fn into_items(self) -> XdmSequence<N> {
        self.buf
    }

    /// Move the buffered items out, leaving the collector empty.
    pub fn take_items(&mut self) -> XdmSequence<N> {
        std::mem::take(&mut self.buf)
    }

    pub fn items(&self) -> &XdmSequence<N> {
        &self.buf
    }
}
