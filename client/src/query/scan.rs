//! Streaming scan results.
//!
//! A [`ScanStream`] pulls response frames lazily and decodes each batch as
//! it arrives. Every batch after the first is decoded against the first
//! batch's schema. The terminal status is known only once the channel
//! signals completion; batches delivered before a failure stay valid.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::{ClientError, ConnectivityKind};
use crate::proto;
use crate::result::{Column, ResultSet, decode};
use crate::session::PooledSession;
use crate::transport::ResponseStream;
use crate::types::issue::issues_from_proto;

/// What a scan asks the server to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    /// Run the query and stream its rows.
    #[default]
    Execute,
    /// Only plan the query; the stream carries the plan and no rows.
    PlanOnly,
}

impl ScanMode {
    pub(crate) const fn to_proto(self) -> proto::ScanMode {
        match self {
            Self::Execute => proto::ScanMode::Execute,
            Self::PlanOnly => proto::ScanMode::Explain,
        }
    }
}

/// Settings for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSettings {
    pub mode: ScanMode,
    /// Upper bound on rows per batch; `0` lets the server choose.
    pub max_rows_per_batch: u32,
}

impl ScanSettings {
    #[must_use]
    pub const fn plan_only() -> Self {
        Self {
            mode: ScanMode::PlanOnly,
            max_rows_per_batch: 0,
        }
    }
}

/// Where a stream is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// More batches may arrive.
    Streaming,
    /// The terminal status has arrived; see [`ScanStream::outcome`].
    Finished,
    /// Consumed past the end; yields nothing more.
    Closed,
}

/// Lazy, forward-only sequence of result batches from one scan.
///
/// The stream mutably borrows its session, so nothing else can run on the
/// session until the stream is dropped. Dropping it before the terminal
/// status arrives abandons the scan; the session is then discarded on
/// release.
pub struct ScanStream<'a> {
    session: &'a mut PooledSession,
    responses: Option<ResponseStream>,
    schema: Option<Vec<Column>>,
    plan: Option<String>,
    outcome: Option<Result<(), ClientError>>,
    state: ScanState,
    batches: usize,
    rows: usize,
}

impl<'a> ScanStream<'a> {
    pub(crate) const fn new(session: &'a mut PooledSession, responses: ResponseStream) -> Self {
        Self {
            session,
            responses: Some(responses),
            schema: None,
            plan: None,
            outcome: None,
            state: ScanState::Streaming,
            batches: 0,
            rows: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ScanState {
        self.state
    }

    /// Terminal status once the stream has finished, `None` while streaming.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<(), &ClientError>> {
        self.outcome
            .as_ref()
            .map(|outcome| outcome.as_ref().map(|_| ()))
    }

    /// Query plan text, for plan-only scans.
    #[must_use]
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }

    /// Column schema fixed by the first batch.
    #[must_use]
    pub fn schema(&self) -> Option<&[Column]> {
        self.schema.as_deref()
    }

    /// Batches delivered so far.
    #[must_use]
    pub const fn batches_delivered(&self) -> usize {
        self.batches
    }

    /// Rows delivered so far.
    #[must_use]
    pub const fn rows_delivered(&self) -> usize {
        self.rows
    }

    /// Wait for the next batch.
    ///
    /// Returns `Ok(None)` once the scan completed successfully, and on every
    /// call after the terminal status was delivered.
    ///
    /// # Errors
    ///
    /// The terminal failure, delivered once after every batch that preceded it:
    /// `Execution` with the server's issues, `Decode` for a malformed batch,
    /// or the transport error that ended the channel.
    pub async fn next_batch(&mut self) -> Result<Option<ResultSet>, ClientError> {
        futures::future::poll_fn(|cx| self.poll_batch(cx))
            .await
            .transpose()
    }

    /// Drain the stream, keeping every batch.
    ///
    /// # Errors
    ///
    /// The terminal failure; batches received before it are dropped. Use
    /// [`ScanStream::next_batch`] to keep them.
    pub async fn collect_batches(&mut self) -> Result<Vec<ResultSet>, ClientError> {
        let mut batches = Vec::new();
        while let Some(batch) = self.next_batch().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    #[allow(clippy::disallowed_methods)] // the failure is both kept and returned
    fn finish(&mut self, outcome: Result<(), ClientError>) -> Option<ClientError> {
        self.responses = None;
        self.state = ScanState::Finished;
        let session = self.session.session_mut();
        session.finish_stream();

        let error = match outcome {
            Ok(()) => {
                debug!(
                    "Scan on session {} finished: {} batch(es), {} row(s)",
                    session.id(),
                    self.batches,
                    self.rows
                );
                self.outcome = Some(Ok(()));
                return None;
            }
            Err(e) => session.fail(e),
        };
        debug!("Scan on session {} failed: {error}", session.id());
        self.outcome = Some(Err(error.clone()));
        Some(error)
    }

    fn poll_batch(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<ResultSet, ClientError>>> {
        loop {
            let Some(responses) = self.responses.as_mut() else {
                if self.state == ScanState::Finished {
                    self.state = ScanState::Closed;
                }
                return Poll::Ready(None);
            };

            let response = match responses.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => {
                    let error = ClientError::Connectivity {
                        kind: ConnectivityKind::Broken,
                        message: "scan stream closed before its final response".to_string(),
                    };
                    return Poll::Ready(self.finish(Err(error)).map(Err));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(self.finish(Err(e.into())).map(Err));
                }
                Poll::Ready(Some(Ok(response))) => response,
            };

            let status = response.status_code();
            if status != proto::StatusCode::Success {
                let error = ClientError::Execution {
                    status,
                    issues: issues_from_proto(response.issues),
                };
                return Poll::Ready(self.finish(Err(error)).map(Err));
            }

            let end_of_stream = response.end_of_stream;
            let part = match response.result {
                Some(proto::server_response::Result::ScanPart(part)) => part,
                None if end_of_stream => proto::ScanQueryPart::default(),
                _ => {
                    let error =
                        ClientError::Decode("scan response carried no scan part".to_string());
                    return Poll::Ready(self.finish(Err(error)).map(Err));
                }
            };
            if !part.query_plan.is_empty() {
                self.plan = Some(part.query_plan);
            }

            let batch = match part.result_set {
                Some(raw) => match decode(raw, self.schema.as_deref()) {
                    Ok(batch) => Some(batch),
                    Err(e) => {
                        // The rest of the stream is never read.
                        self.session
                            .session_mut()
                            .mark_broken(&"scan abandoned after a malformed batch");
                        return Poll::Ready(self.finish(Err(e.into())).map(Err));
                    }
                },
                None => None,
            };
            if let Some(batch) = &batch {
                if self.schema.is_none() {
                    self.schema = Some(batch.columns().to_vec());
                }
                self.batches += 1;
                self.rows += batch.row_count();
            }

            if end_of_stream {
                let _ = self.finish(Ok(()));
            }
            match batch {
                Some(batch) => return Poll::Ready(Some(Ok(batch))),
                None if end_of_stream => {
                    self.state = ScanState::Closed;
                    return Poll::Ready(None);
                }
                None => {}
            }
        }
    }
}

impl Stream for ScanStream<'_> {
    type Item = Result<ResultSet, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_batch(cx)
    }
}

impl std::fmt::Debug for ScanStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanStream")
            .field("session", &self.session.id())
            .field("state", &self.state)
            .field("batches", &self.batches)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}
