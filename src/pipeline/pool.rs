//! Fixed-size worker pool over book ids.
//!
//! Books are independent: each worker takes the next id from a shared
//! queue and runs the whole book on its own SQLite connection. Within a
//! book everything stays sequential.

use std::collections::VecDeque;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::db::DatabaseError;
use crate::pipeline::error::PipelineError;
use crate::pipeline::orchestrator::{BookReport, Orchestrator};

pub type BookResult = (i64, Result<BookReport, PipelineError>);

/// Run every book in `book_ids` with `workers` threads.
///
/// `open` is called once per worker to get its connection. Results come
/// back in the order of `book_ids`.
pub fn run_books<F>(
    orchestrator: &Orchestrator<'_>,
    book_ids: &[i64],
    workers: usize,
    open: F,
) -> Vec<BookResult>
where
    F: Fn() -> Result<Connection, DatabaseError> + Sync,
{
    let queue: Mutex<VecDeque<i64>> = Mutex::new(book_ids.iter().copied().collect());
    let results: Mutex<Vec<BookResult>> = Mutex::new(Vec::with_capacity(book_ids.len()));
    let workers = workers.clamp(1, book_ids.len().max(1));
    tracing::info!(books = book_ids.len(), workers, "Worker pool started");

    std::thread::scope(|scope| {
        for worker in 0..workers {
            let queue = &queue;
            let results = &results;
            let open = &open;
            scope.spawn(move || {
                let mut conn: Option<Connection> = None;
                loop {
                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(_) => None,
                    };
                    let Some(book_id) = next else {
                        break;
                    };

                    if conn.is_none() {
                        match open() {
                            Ok(c) => conn = Some(c),
                            Err(e) => {
                                tracing::error!(worker, book_id, error = %e, "Worker could not open database");
                                push(results, (book_id, Err(e.into())));
                                continue;
                            }
                        }
                    }
                    let Some(conn) = conn.as_ref() else {
                        continue;
                    };

                    tracing::debug!(worker, book_id, "Worker picked book");
                    let result = orchestrator.run_book(conn, book_id);
                    if let Err(e) = &result {
                        tracing::error!(worker, book_id, error = %e, "Book pipeline failed");
                    }
                    push(results, (book_id, result));
                }
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    results.sort_by_key(|(id, _)| book_ids.iter().position(|b| b == id).unwrap_or(usize::MAX));
    results
}

fn push(results: &Mutex<Vec<BookResult>>, result: BookResult) {
    match results.lock() {
        Ok(mut r) => r.push(result),
        Err(poisoned) => poisoned.into_inner().push(result),
    }
}
