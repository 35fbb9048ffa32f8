//! Ordered callback dispatch for inbound frames.
//!
//! Callbacks are registered during setup and invoked synchronously, in
//! registration order, for each frame in arrival order. They must not block.

use tracing::{debug, warn};

use crate::directory::AliasDirectory;
use crate::error::TelemetryError;
use crate::parser::parse_frame;
use crate::record::{ErrorRecord, Frame, PublishEntry, StatusRecord};

type Callback<T> = Box<dyn FnMut(&[T]) + Send>;

/// Callback registry for PUBLISH, ERROR_LOG and STATUS_LOG frames.
#[derive(Default)]
pub struct Telemetry {
    publish: Vec<Callback<PublishEntry>>,
    error_log: Vec<Callback<ErrorRecord>>,
    status_log: Vec<Callback<StatusRecord>>,
    unknown: Option<Box<dyn FnMut(&[u8]) + Send>>,
    directory: Option<AliasDirectory>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("publish", &self.publish.len())
            .field("error_log", &self.error_log.len())
            .field("status_log", &self.status_log.len())
            .field("unknown", &self.unknown.is_some())
            .field("directory", &self.directory.as_ref().map(AliasDirectory::len))
            .finish()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_directory(mut self, directory: AliasDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn directory(&self) -> Option<&AliasDirectory> {
        self.directory.as_ref()
    }

    pub fn on_publish(&mut self, f: impl FnMut(&[PublishEntry]) + Send + 'static) -> &mut Self {
        self.publish.push(Box::new(f));
        self
    }

    pub fn on_error_log(&mut self, f: impl FnMut(&[ErrorRecord]) + Send + 'static) -> &mut Self {
        self.error_log.push(Box::new(f));
        self
    }

    pub fn on_status_log(&mut self, f: impl FnMut(&[StatusRecord]) + Send + 'static) -> &mut Self {
        self.status_log.push(Box::new(f));
        self
    }

    /// Receives frames whose header is not a telemetry header. Replaces any
    /// previous handler.
    pub fn on_unknown(&mut self, f: impl FnMut(&[u8]) + Send + 'static) -> &mut Self {
        self.unknown = Some(Box::new(f));
        self
    }

    /// Decode `frame` and run the matching callbacks.
    ///
    /// Unknown headers go to the `on_unknown` handler (or the log) and yield
    /// `Ok(None)`. Malformed frames are logged and returned as errors.
    pub fn dispatch(&mut self, frame: &[u8]) -> Result<Option<Frame>, TelemetryError> {
        let decoded = match parse_frame(frame) {
            Ok(decoded) => decoded,
            Err(TelemetryError::UnknownHeader(header)) => {
                match &mut self.unknown {
                    Some(f) => f(frame),
                    None => warn!(header, len = frame.len(), "unknown frame ignored"),
                }
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "malformed telemetry frame");
                return Err(e);
            }
        };

        match &decoded {
            Frame::Publish(entries) => {
                if let Some(dir) = &self.directory {
                    for e in entries {
                        debug!(
                            alias = dir.alias_of(e).unwrap_or("?"),
                            instance = e.instance,
                            ctx = e.ctx,
                            "publish"
                        );
                    }
                }
                self.publish.iter_mut().for_each(|f| f(entries));
            }
            Frame::ErrorLog(records) => {
                for r in records {
                    warn!(code = r.code, owner = r.owner, owner_idx = r.owner_idx, "device error");
                }
                self.error_log.iter_mut().for_each(|f| f(records));
            }
            Frame::StatusLog(records) => {
                self.status_log.iter_mut().for_each(|f| f(records));
            }
        }
        Ok(Some(decoded))
    }
}
