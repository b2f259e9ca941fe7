// LogSieve - GPL-3.0-or-later
// This file is part of LogSieve.
//
// Copyright (C) 2025 Daniel Freiermuth
//
// LogSieve is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// LogSieve is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with LogSieve.  If not, see <https://www.gnu.org/licenses/>.

//! Explicit logging context handed to every pipeline call.
//!
//! The core never installs a global subscriber. Each caller builds a
//! [`PipelineContext`] with the sink it wants and the pipeline emits its
//! `tracing` events through that context only.

use crate::error::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Dispatch;
use tracing_subscriber::EnvFilter;

/// Where pipeline diagnostics go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Human readable lines on stderr
    Console,
    /// Appended to a file, without ANSI colors
    File(PathBuf),
    /// Discard everything
    None,
}

/// Logging context for one pipeline invocation
#[derive(Clone)]
pub struct PipelineContext {
    dispatch: Dispatch,
}

impl PipelineContext {
    /// Build a context writing to `sink`.
    ///
    /// `RUST_LOG` overrides the default `info` level for the console and file sinks.
    pub fn new(sink: LogSink) -> Result<Self> {
        let dispatch = match sink {
            LogSink::Console => Dispatch::new(
                tracing_subscriber::fmt()
                    .with_env_filter(default_filter())
                    .with_writer(std::io::stderr)
                    .finish(),
            ),
            LogSink::File(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                Dispatch::new(
                    tracing_subscriber::fmt()
                        .with_env_filter(default_filter())
                        .with_ansi(false)
                        .with_writer(Mutex::new(file))
                        .finish(),
                )
            }
            LogSink::None => Dispatch::none(),
        };
        Ok(Self { dispatch })
    }

    /// Context that drops every event
    pub fn silent() -> Self {
        Self {
            dispatch: Dispatch::none(),
        }
    }

    /// Run `f` with this context's subscriber as the current default.
    ///
    /// The dispatcher is thread-local, so events emitted from rayon workers
    /// inside `f` are not captured.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::silent()
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext").finish_non_exhaustive()
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
