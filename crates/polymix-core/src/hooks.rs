//! Synchronous publish-subscribe bus for cross-module coordination.
//!
//! Modules subscribe during `setup` and are called back while the build
//! runs: after each placement (`placing:chunk`), once the layout is final
//! (`placing:complete`), and after the output file is closed
//! (`writing:finish`). Callbacks run synchronously in registration order in
//! the caller's thread; a callback error aborts the trigger and propagates
//! to the caller.
//!
//! The bus is passed explicitly to every module's `setup`; there is no
//! process-global registry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::rc::Rc;

use crate::chunk::Chunk;
use crate::error::Result;
use crate::layout::Layout;

/// Hook topics, the stable interface between modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `placing:chunk` - a chunk landed at a non-negative coordinate
    ChunkPlaced,
    /// `placing:complete` - every chunk, tail included, is in the index
    PlacementComplete,
    /// `writing:finish` - the output file is written and closed
    WritingFinished,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ChunkPlaced => "placing:chunk",
            Self::PlacementComplete => "placing:complete",
            Self::WritingFinished => "writing:finish",
        };
        f.write_str(name)
    }
}

/// Payload delivered to subscribers, one variant per topic.
pub enum HookEvent<'a> {
    ChunkPlaced {
        start: i64,
        end: i64,
        chunk: &'a Rc<Chunk>,
    },
    PlacementComplete {
        layout: &'a Layout,
    },
    WritingFinished {
        path: &'a Path,
    },
}

impl HookEvent<'_> {
    pub fn topic(&self) -> Topic {
        match self {
            Self::ChunkPlaced { .. } => Topic::ChunkPlaced,
            Self::PlacementComplete { .. } => Topic::PlacementComplete,
            Self::WritingFinished { .. } => Topic::WritingFinished,
        }
    }
}

type Subscriber = Rc<dyn Fn(&HookEvent<'_>) -> Result<()>>;

/// Topic-keyed subscriber lists.
#[derive(Default)]
pub struct HookBus {
    topics: RefCell<HashMap<Topic, Vec<Subscriber>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `callback` to the topic's subscriber list.
    pub fn register<F>(&self, topic: Topic, callback: F)
    where
        F: Fn(&HookEvent<'_>) -> Result<()> + 'static,
    {
        self.topics
            .borrow_mut()
            .entry(topic)
            .or_default()
            .push(Rc::new(callback));
    }

    /// Invoke every subscriber of the event's topic, in registration order.
    ///
    /// The subscriber list is snapshotted first, so callbacks may register
    /// further subscribers re-entrantly; such late registrations are not
    /// visited by the current trigger. A topic without subscribers is
    /// silently empty. The first callback error short-circuits the rest.
    pub fn trigger(&self, event: &HookEvent<'_>) -> Result<()> {
        let snapshot: Vec<Subscriber> = self
            .topics
            .borrow()
            .get(&event.topic())
            .map(|subscribers| subscribers.clone())
            .unwrap_or_default();

        for subscriber in snapshot {
            subscriber(event)?;
        }
        Ok(())
    }

    /// Number of subscribers currently registered under `topic`
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .borrow()
            .get(&topic)
            .map_or(0, |subscribers| subscribers.len())
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics = self.topics.borrow();
        let mut counts: Vec<(Topic, usize)> = topics
            .iter()
            .map(|(&topic, subscribers)| (topic, subscribers.len()))
            .collect();
        counts.sort_by_key(|(topic, _)| format!("{topic}"));
        write!(f, "HookBus({counts:?})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SharedBuf;
    use crate::error::Error;

    fn placed_event(chunk: &Rc<Chunk>) -> HookEvent<'_> {
        HookEvent::ChunkPlaced {
            start: 0,
            end: chunk.size as i64,
            chunk,
        }
    }

    #[test]
    fn subscribers_run_in_registration_order() {
        let bus = HookBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for id in 0..3 {
            let log = Rc::clone(&log);
            bus.register(Topic::ChunkPlaced, move |_| {
                log.borrow_mut().push(id);
                Ok(())
            });
        }

        let chunk = Rc::new(Chunk::fixed(0, 4, 0, SharedBuf::zeroed(4)));
        bus.trigger(&placed_event(&chunk)).unwrap();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn missing_topic_is_silently_empty() {
        let bus = HookBus::new();
        let layout = Layout::new();
        bus.trigger(&HookEvent::PlacementComplete { layout: &layout })
            .unwrap();
    }

    #[test]
    fn callback_error_short_circuits() {
        let bus = HookBus::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let log = Rc::clone(&log);
            bus.register(Topic::ChunkPlaced, move |_| {
                log.borrow_mut().push("first");
                Err(Error::invalid_input("boom"))
            });
        }
        {
            let log = Rc::clone(&log);
            bus.register(Topic::ChunkPlaced, move |_| {
                log.borrow_mut().push("second");
                Ok(())
            });
        }

        let chunk = Rc::new(Chunk::fixed(0, 4, 0, SharedBuf::zeroed(4)));
        let err = bus.trigger(&placed_event(&chunk)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn reentrant_registration_does_not_fire_in_current_trigger() {
        let bus = Rc::new(HookBus::new());
        let log = Rc::new(RefCell::new(Vec::new()));

        {
            let bus_handle = Rc::clone(&bus);
            let log = Rc::clone(&log);
            bus.register(Topic::ChunkPlaced, move |_| {
                log.borrow_mut().push("outer");
                let log = Rc::clone(&log);
                bus_handle.register(Topic::ChunkPlaced, move |_| {
                    log.borrow_mut().push("inner");
                    Ok(())
                });
                Ok(())
            });
        }

        let chunk = Rc::new(Chunk::fixed(0, 4, 0, SharedBuf::zeroed(4)));
        bus.trigger(&placed_event(&chunk)).unwrap();
        assert_eq!(*log.borrow(), vec!["outer"]);

        bus.trigger(&placed_event(&chunk)).unwrap();
        assert_eq!(*log.borrow(), vec!["outer", "outer", "inner"]);
    }

    #[test]
    fn topics_are_independent() {
        let bus = HookBus::new();
        let count = Rc::new(RefCell::new(0));
        {
            let count = Rc::clone(&count);
            bus.register(Topic::WritingFinished, move |_| {
                *count.borrow_mut() += 1;
                Ok(())
            });
        }

        let chunk = Rc::new(Chunk::fixed(0, 4, 0, SharedBuf::zeroed(4)));
        bus.trigger(&placed_event(&chunk)).unwrap();
        assert_eq!(*count.borrow(), 0);

        bus.trigger(&HookEvent::WritingFinished {
            path: Path::new("out.bin"),
        })
        .unwrap();
        assert_eq!(*count.borrow(), 1);
        assert_eq!(bus.subscriber_count(Topic::WritingFinished), 1);
        assert_eq!(bus.subscriber_count(Topic::ChunkPlaced), 0);
    }
}
