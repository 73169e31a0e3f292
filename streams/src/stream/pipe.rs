//! Source to sink forwarding with backpressure.
//!
//! A source may feed several destinations. It pauses as soon as any of them reports
//! backpressure and resumes once every one of those has emitted `"drain"`. Which
//! destinations are still owed a `"drain"` is tracked in a bit set indexed by link slot.

use std::rc::Weak;

use fixedbitset::FixedBitSet;

use crate::event::{Subscription, Value};
use crate::stream::{CLOSE, DATA, DRAIN, END, FINISH, Inner, PIPE, Stream, UNPIPE};

/// Options for [`pipe_with()`](crate::stream::Source::pipe_with).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeOptions {
    /// End the destination when the source ends.
    pub end: bool,
}

impl PipeOptions {
    pub const fn new() -> Self {
        Self { end: true }
    }

    pub const fn with_end(mut self, end: bool) -> Self {
        self.end = end;
        self
    }
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriptions that make up one source to destination link.
pub(crate) struct PipeLink {
    dest: Weak<Inner>,
    on_data: Subscription,
    on_end: Option<Subscription>,
    on_drain: Subscription,
    on_close: Subscription,
    on_finish: Subscription,
}

/// The destinations of a read side.
#[derive(Default)]
pub(crate) struct PipeSet {
    links: Vec<Option<PipeLink>>,
    awaiting_drain: FixedBitSet,
}

impl PipeSet {
    /// Returns a free slot index, growing the set if needed.
    fn reserve(&mut self) -> usize {
        match self.links.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                self.links.push(None);
                self.awaiting_drain.grow(self.links.len());
                self.links.len() - 1
            }
        }
    }

    fn occupy(&mut self, slot: usize, link: PipeLink) {
        self.links[slot] = Some(link);
    }

    fn remove(&mut self, slot: usize) -> Option<PipeLink> {
        self.awaiting_drain.set(slot, false);
        self.links.get_mut(slot)?.take()
    }

    #[inline]
    fn is_occupied(&self, slot: usize) -> bool {
        self.links.get(slot).is_some_and(Option::is_some)
    }

    /// Slots whose destination was dropped.
    fn dropped_slots(&self) -> Vec<usize> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(slot, link)| match link {
                Some(link) if link.dest.strong_count() == 0 => Some(slot),
                _ => None,
            })
            .collect()
    }

    fn slots_of(&self, dest: Option<&Stream>) -> Vec<usize> {
        self.links
            .iter()
            .enumerate()
            .filter_map(|(slot, link)| match (link, dest) {
                (Some(_), None) => Some(slot),
                (Some(link), Some(dest)) if dest.is(&link.dest) => Some(slot),
                _ => None,
            })
            .collect()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.links.iter().all(Option::is_none)
    }

    #[inline]
    fn is_waiting(&self) -> bool {
        !self.awaiting_drain.is_clear()
    }
}

impl Stream {
    pub(crate) fn pipe(&self, dest: &Stream, options: PipeOptions) {
        let Some(side) = self.inner.read.as_ref() else {
            log::warn!("pipe() from a stream without a read side");
            return;
        };
        if !dest.is_writable() {
            log::warn!("pipe() into a stream without a write side");
            return;
        }
        if self.is_destroyed() {
            return;
        }

        let slot = side.state.borrow_mut().pipes.reserve();
        let source = self.downgrade();
        let target = dest.downgrade();
        let ended = side.is_done();

        let on_data = {
            let (source, target) = (source.clone(), target.clone());
            self.inner.emitter.on(DATA, move |args: &[Value]| {
                let Some(source) = Stream::upgrade(&source) else {
                    return Ok(());
                };
                let Some(dest) = Stream::upgrade(&target) else {
                    source.unpipe_dropped();
                    return Ok(());
                };
                if dest.is_destroyed() {
                    return Ok(());
                }
                let Some(chunk) = args.first().and_then(Value::as_chunk) else {
                    return Ok(());
                };
                // A destination destroyed by this write has already been unpiped.
                if !dest.write(chunk.clone()) && !dest.is_destroyed() {
                    source.await_drain(slot);
                }
                Ok(())
            })
        };
        let on_end = (options.end && !ended).then(|| {
            let target = target.clone();
            self.inner.emitter.once(END, move |_| {
                if let Some(dest) = Stream::upgrade(&target) {
                    dest.end(None);
                }
                Ok(())
            })
        });
        let on_drain = {
            let source = source.clone();
            dest.inner.emitter.on(DRAIN, move |_| {
                if let Some(source) = Stream::upgrade(&source) {
                    source.drained(slot);
                }
                Ok(())
            })
        };
        let detach = |event: &str| {
            let (source, target) = (source.clone(), target.clone());
            dest.inner.emitter.once(event, move |_| {
                if let (Some(source), Some(dest)) = (Stream::upgrade(&source), Stream::upgrade(&target)) {
                    source.unpipe(Some(&dest));
                }
                Ok(())
            })
        };
        let on_close = detach(CLOSE);
        let on_finish = detach(FINISH);

        side.state.borrow_mut().pipes.occupy(
            slot,
            PipeLink {
                dest: target,
                on_data,
                on_end,
                on_drain,
                on_close,
                on_finish,
            },
        );
        log::debug!("piped into slot {slot}");

        if options.end && ended {
            let dest = dest.clone();
            self.tasks().defer(move || dest.end(None));
        }

        dest.dispatch(PIPE, &[]);
        if dest.needs_drain() {
            self.await_drain(slot);
        } else {
            self.resume_deferred();
        }
    }

    #[cfg(test)]
    pub(crate) fn pipe_count(&self) -> usize {
        self.inner.read.as_ref().map_or(0, |side| {
            let state = side.state.borrow();
            state.pipes.links.iter().filter(|link| link.is_some()).count()
        })
    }

    fn await_drain(&self, slot: usize) {
        let Some(side) = self.inner.read.as_ref() else {
            return;
        };
        {
            let mut state = side.state.borrow_mut();
            if !state.pipes.is_occupied(slot) {
                return;
            }
            state.pipes.awaiting_drain.insert(slot);
        }
        log::trace!("slot {slot} applied backpressure");
        self.pause();
    }

    fn drained(&self, slot: usize) {
        let Some(side) = self.inner.read.as_ref() else {
            return;
        };
        let resume = {
            let mut state = side.state.borrow_mut();
            let pipes = &mut state.pipes;
            if slot >= pipes.awaiting_drain.len() || !pipes.awaiting_drain.contains(slot) {
                return;
            }
            pipes.awaiting_drain.set(slot, false);
            !pipes.is_waiting()
        };
        if resume && !self.is_destroyed() {
            log::trace!("every destination drained");
            self.resume();
        }
    }

    pub(crate) fn unpipe(&self, dest: Option<&Stream>) {
        let Some(side) = self.inner.read.as_ref() else {
            return;
        };
        let slots = side.state.borrow().pipes.slots_of(dest);
        self.unpipe_slots(&slots);
    }

    /// Removes the links whose destination no longer exists.
    fn unpipe_dropped(&self) {
        let Some(side) = self.inner.read.as_ref() else {
            return;
        };
        let slots = side.state.borrow().pipes.dropped_slots();
        if !slots.is_empty() {
            log::debug!("unpiping {} dropped destination(s)", slots.len());
        }
        self.unpipe_slots(&slots);
    }

    fn unpipe_slots(&self, slots: &[usize]) {
        let Some(side) = self.inner.read.as_ref() else {
            return;
        };
        let (removed, was_waiting) = {
            let mut state = side.state.borrow_mut();
            let pipes = &mut state.pipes;
            let was_waiting = pipes.is_waiting();
            let removed: Vec<PipeLink> = slots
                .iter()
                .filter_map(|&slot| pipes.remove(slot))
                .collect();
            (removed, was_waiting)
        };
        if removed.is_empty() {
            return;
        }

        for link in removed {
            self.inner.emitter.off(&link.on_data);
            if let Some(on_end) = &link.on_end {
                self.inner.emitter.off(on_end);
            }
            if let Some(dest) = Stream::upgrade(&link.dest) {
                dest.inner.emitter.off(&link.on_drain);
                dest.inner.emitter.off(&link.on_close);
                dest.inner.emitter.off(&link.on_finish);
                dest.dispatch(UNPIPE, &[]);
            }
        }
        log::debug!("unpiped");

        if self.is_destroyed() || side.is_done() {
            return;
        }
        let (empty, waiting) = {
            let state = side.state.borrow();
            (state.pipes.is_empty(), state.pipes.is_waiting())
        };
        if empty && self.inner.emitter.listener_count(DATA) == 0 {
            self.pause();
        } else if was_waiting && !waiting {
            self.resume();
        }
    }
}
