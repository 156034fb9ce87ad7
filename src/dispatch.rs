/*
 * Copyright Stalwart Labs Ltd. See the COPYING
 * file at the top-level directory of this distribution.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Batch dispatcher.
//!
//! With a concurrency of one, every copy goes through a single session.
//! Otherwise copies are split in batches of `concurrency` workers, each
//! worker opening its own session. A batch is drained before the next one
//! starts, so at most `concurrency` sessions are open at any time.

use std::{collections::HashMap, ops::RangeInclusive, sync::Arc};

use tokio::task::JoinSet;

use crate::{
    compose::{Envelope, MessageSource},
    diagnostics::Diagnostics,
    smtp::message::Message,
    transport::{Session, Transport},
    Error,
};

/// How many copies to send and how many may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    count: usize,
    concurrency: usize,
}

impl Job {
    /// The concurrency is clamped to `1..=count`.
    pub fn new(count: usize, concurrency: usize) -> Self {
        Job {
            count,
            concurrency: concurrency.clamp(1, count.max(1)),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// 1-based copy indexes of each batch, in dispatch order.
    pub fn batches(&self) -> impl Iterator<Item = RangeInclusive<usize>> {
        let (count, concurrency) = (self.count, self.concurrency);
        (0..count)
            .step_by(concurrency)
            .map(move |start| start + 1..=(start + concurrency).min(count))
    }
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Report {
    pub delivered: usize,
    pub batches: usize,
}

pub struct Dispatcher<T: Transport> {
    transport: Arc<T>,
    envelope: Arc<Envelope>,
    diagnostics: Diagnostics,
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(transport: T, envelope: Envelope, diagnostics: &Diagnostics) -> Self {
        Dispatcher {
            transport: Arc::new(transport),
            envelope: Arc::new(envelope),
            diagnostics: diagnostics.scoped("mailshot::dispatch"),
        }
    }

    /// Sends `job.count()` copies produced by `source`.
    pub async fn dispatch<S: MessageSource>(
        &self,
        source: Arc<S>,
        job: Job,
    ) -> crate::Result<Report> {
        if job.count() == 0 {
            return Ok(Report::default());
        }

        if job.concurrency() == 1 {
            self.sequential(source.as_ref(), job).await
        } else {
            self.concurrent(source, job).await
        }
    }

    async fn sequential<S: MessageSource>(&self, source: &S, job: Job) -> crate::Result<Report> {
        // Render before connecting so that a bad message opens no session
        let mut message = render(source, &self.envelope, 1)?;
        let mut session = self.transport.open().await?;
        self.diagnostics
            .debug(format_args!("Session opened for {} copies", job.count()));

        let mut result = Ok(());
        for index in 1..=job.count() {
            if index > 1 {
                message = match render(source, &self.envelope, index) {
                    Ok(message) => message,
                    Err(error) => {
                        result = Err(error.at(index));
                        break;
                    }
                };
            }
            if let Err(error) = session.deliver(&message).await {
                result = Err(error.at(index));
                break;
            }
            self.diagnostics.debug(format_args!("Copy #{index} delivered"));
        }

        let closed = session.close().await;
        match (result, closed) {
            (Err(error), closed) => {
                if let Err(close_error) = closed {
                    self.diagnostics
                        .debug(format_args!("Failed to close session: {close_error}"));
                }
                self.diagnostics.error(format_args!("{error}"));
                Err(error)
            }
            (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(Report {
                delivered: job.count(),
                batches: 1,
            }),
        }
    }

    async fn concurrent<S: MessageSource>(
        &self,
        source: Arc<S>,
        job: Job,
    ) -> crate::Result<Report> {
        let mut report = Report::default();

        for (batch, copies) in job.batches().enumerate().map(|(n, copies)| (n + 1, copies)) {
            self.diagnostics.debug(format_args!(
                "Batch {batch}: copies #{} to #{}",
                copies.start(),
                copies.end()
            ));

            let mut workers = JoinSet::new();
            let mut indexes = HashMap::new();
            for index in copies {
                let transport = self.transport.clone();
                let envelope = self.envelope.clone();
                let source = source.clone();
                let worker = workers.spawn(async move {
                    deliver_one(transport.as_ref(), &envelope, source.as_ref(), index).await
                });
                indexes.insert(worker.id(), index);
            }

            let mut failures = Vec::new();
            while let Some(outcome) = workers.join_next_with_id().await {
                let (id, result) = match outcome {
                    Ok((id, result)) => (id, result),
                    Err(join_error) => {
                        self.diagnostics
                            .debug(format_args!("Delivery worker failed: {join_error}"));
                        (join_error.id(), Err(Error::WorkerPanicked))
                    }
                };
                match result {
                    Ok(()) => report.delivered += 1,
                    Err(error) => {
                        let error = match indexes.get(&id) {
                            Some(index) => error.at(*index),
                            None => error,
                        };
                        self.diagnostics.error(format_args!("{error}"));
                        failures.push(error);
                    }
                }
            }
            report.batches = batch;

            if !failures.is_empty() {
                return Err(Error::BatchFailed { batch, failures });
            }
        }

        Ok(report)
    }
}

/// Renders, connects, sends and disconnects a single copy.
async fn deliver_one<T: Transport, S: MessageSource>(
    transport: &T,
    envelope: &Envelope,
    source: &S,
    index: usize,
) -> crate::Result<()> {
    let message = render(source, envelope, index)?;
    let mut session = transport.open().await?;
    let result = session.deliver(&message).await;
    let closed = session.close().await;
    result.and(closed)
}

fn render<S: MessageSource>(
    source: &S,
    envelope: &Envelope,
    index: usize,
) -> crate::Result<Message<'static>> {
    let envelope = envelope.resolve(index);
    let body = source.render(&envelope, index)?;
    Ok(envelope.into_message(body))
}

impl Error {
    fn at(self, index: usize) -> Self {
        Error::Delivery {
            index,
            error: Box::new(self),
        }
    }
}
