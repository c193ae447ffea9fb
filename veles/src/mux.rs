// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::error::Error;

const EVENTS_CAPACITY: usize = 1024;

/// One readiness record from the last wait.
#[derive(Debug, Clone, Copy)]
pub struct Readiness {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
}

/// Adapter over the OS readiness primitive.
///
/// The engine registers every fd for readability only and reacts
/// level-style by reading or accepting until `WouldBlock`; writes are
/// attempted opportunistically after state changes, so writability is
/// never waited on.
#[derive(Debug)]
pub struct Multiplexer {
    poll: Poll,
    events: Events,
}

impl Multiplexer {
    /// # Errors
    ///
    /// Returns error if the OS readiness primitive cannot be created.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
        })
    }

    /// Register an event source under `token`.
    ///
    /// # Errors
    ///
    /// Returns error if the OS rejects the registration.
    pub fn register<S: Source>(
        &self,
        source: &mut S,
        token: usize,
        readable: bool,
        writable: bool,
    ) -> Result<(), Error> {
        let interest = match (readable, writable) {
            (true, true) => Interest::READABLE.add(Interest::WRITABLE),
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        self.poll
            .registry()
            .register(source, Token(token), interest)?;
        Ok(())
    }

    /// Remove an event source from the wait set.
    ///
    /// # Errors
    ///
    /// Returns error if the source was not registered.
    pub fn unregister<S: Source>(&self, source: &mut S) -> Result<(), Error> {
        self.poll.registry().deregister(source)?;
        Ok(())
    }

    /// Wait for readiness. `timeout_ms < 0` waits indefinitely and
    /// `timeout_ms == 0` polls.
    ///
    /// # Errors
    ///
    /// Returns error on wait failures other than an interrupted call,
    /// which yields zero events instead.
    pub fn wait(&mut self, timeout_ms: i64) -> Result<usize, Error> {
        let timeout = if timeout_ms < 0 {
            None
        } else {
            let ms = u64::try_from(timeout_ms).unwrap_or(0);
            Some(Duration::from_millis(ms))
        };

        if let Err(err) = self.poll.poll(&mut self.events, timeout) {
            if err.kind() == io::ErrorKind::Interrupted {
                self.events.clear();
                return Ok(0);
            }
            return Err(err.into());
        }
        Ok(self.events.iter().count())
    }

    /// Enumerate the readiness records of the last wait.
    pub fn readiness(&self) -> impl Iterator<Item = Readiness> + '_ {
        self.events.iter().map(|event| Readiness {
            token: event.token().0,
            readable: event.is_readable(),
            writable: event.is_writable(),
        })
    }
}
