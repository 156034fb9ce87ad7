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

//! Logging handle passed to the components that report progress.
//!
//! No logger is installed process-wide: every component receives a
//! [`Diagnostics`] value and writes its records through it.

use std::{fmt, fs::OpenOptions, path::Path, sync::Arc};

use env_logger::{Builder, Env, Target, WriteStyle};
use log::{Level, LevelFilter, Log, Metadata, Record};

#[derive(Clone)]
pub struct Diagnostics {
    logger: Arc<dyn Log>,
    target: &'static str,
}

impl Diagnostics {
    pub fn new(logger: impl Log + 'static) -> Self {
        Diagnostics {
            logger: Arc::new(logger),
            target: "mailshot",
        }
    }

    /// Builds an `env_logger` backed handle.
    ///
    /// `RUST_LOG` is honoured, `verbosity` raises the default level from
    /// `info` to `debug` (1) or `trace` (2+). With a `log_file` the records
    /// are appended to it, otherwise they go to stderr.
    pub fn from_env(verbosity: u8, log_file: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
        match verbosity {
            0 => (),
            1 => {
                builder.filter_level(LevelFilter::Debug);
            }
            _ => {
                builder.filter_level(LevelFilter::Trace);
            }
        }

        if let Some(path) = log_file {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .target(Target::Pipe(Box::new(file)))
                .write_style(WriteStyle::Never);
        }

        Ok(Diagnostics::new(builder.build()))
    }

    /// Discards every record.
    pub fn disabled() -> Self {
        Diagnostics::new(Discard)
    }

    /// Same sink, records tagged with another target.
    pub fn scoped(&self, target: &'static str) -> Self {
        Diagnostics {
            logger: self.logger.clone(),
            target,
        }
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .args(args)
            .level(level)
            .target(self.target)
            .build();
        if self.logger.enabled(record.metadata()) {
            self.logger.log(&record);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn flush(&self) {
        self.logger.flush();
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("target", &self.target)
            .finish()
    }
}

struct Discard;

impl Log for Discard {
    fn enabled(&self, _: &Metadata<'_>) -> bool {
        false
    }

    fn log(&self, _: &Record<'_>) {}

    fn flush(&self) {}
}

#[cfg(test)]
pub(crate) mod test {
    use std::sync::{Arc, Mutex};

    use log::{Level, Log, Metadata, Record};

    use super::Diagnostics;

    /// Keeps every record in memory.
    #[derive(Clone, Default)]
    pub(crate) struct Capture {
        pub records: Arc<Mutex<Vec<(Level, String, String)>>>,
    }

    impl Capture {
        pub fn lines(&self, level: Level) -> Vec<String> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _, _)| *l == level)
                .map(|(_, _, message)| message.clone())
                .collect()
        }
    }

    impl Log for Capture {
        fn enabled(&self, _: &Metadata<'_>) -> bool {
            true
        }

        fn log(&self, record: &Record<'_>) {
            self.records.lock().unwrap().push((
                record.level(),
                record.target().to_string(),
                record.args().to_string(),
            ));
        }

        fn flush(&self) {}
    }

    #[test]
    fn scoped_targets() {
        let capture = Capture::default();
        let diagnostics = Diagnostics::new(capture.clone());
        diagnostics.info(format_args!("starting {}", 1));
        diagnostics.scoped("mailshot::dispatch").warn(format_args!("slow"));

        let records = capture.records.lock().unwrap().clone();
        assert_eq!(
            records,
            vec![
                (Level::Info, "mailshot".to_string(), "starting 1".to_string()),
                (Level::Warn, "mailshot::dispatch".to_string(), "slow".to_string()),
            ]
        );
    }

    #[test]
    fn appends_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailshot.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let diagnostics = Diagnostics::from_env(0, Some(path.as_path())).unwrap();
        diagnostics.error(format_args!("relay unreachable"));
        diagnostics.flush();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("previous run\n"));
        assert!(contents.contains("relay unreachable"));
    }

    #[test]
    fn disabled_discards() {
        Diagnostics::disabled().error(format_args!("ignored"));
    }
}
