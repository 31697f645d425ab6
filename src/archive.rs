//! Archive controller: one database, one engine per record kind.
//!
//! The controller opens the database, initializes the schema and constructs
//! the per-kind archives as explicit public handles. Producers and consumers
//! receive the handle of the kind they work with; nothing is reachable
//! through global state. Different kinds never contend: each handle owns its
//! queue, its connections and its exclusion domain.

use std::path::Path;

use crate::config::ArchiveConfig;
use crate::engine::DataArchive;
use crate::error::ArchiveError;
use crate::kinds::ack_message::AcknowledgedMessageKind;
use crate::kinds::activity::ActivityOccurrenceKind;
use crate::kinds::alarm::AlarmKind;
use crate::kinds::event::EventKind;
use crate::kinds::message::OperationalMessageKind;
use crate::kinds::parameter::ParameterKind;
use crate::kinds::raw_data::RawDataKind;
use crate::kinds::schedule::ScheduledActivityKind;
use crate::provider::ConnectionProvider;
use crate::schema::init_schema;
use crate::types::DebugInformation;

/// The persistence tier: every record kind of the monitoring and control
/// platform, archived into one database file.
pub struct Archive {
    provider: ConnectionProvider,
    pub parameters: DataArchive<ParameterKind>,
    pub raw_data: DataArchive<RawDataKind>,
    pub events: DataArchive<EventKind>,
    pub alarms: DataArchive<AlarmKind>,
    pub messages: DataArchive<OperationalMessageKind>,
    pub ack_messages: DataArchive<AcknowledgedMessageKind>,
    pub activity_occurrences: DataArchive<ActivityOccurrenceKind>,
    pub scheduled_activities: DataArchive<ScheduledActivityKind>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.provider.database_path())
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Open (or create) the archive at the given path with default settings.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::with_config(ArchiveConfig::new(path.as_ref()))
    }

    /// Open (or create) the archive with explicit configuration.
    pub fn with_config(config: ArchiveConfig) -> Result<Self, ArchiveError> {
        config.validate()?;
        let provider = ConnectionProvider::new(&config.path)?;
        {
            let conn = provider.create_connection(true)?;
            init_schema(&conn)?;
        }
        let flush_interval = config.flush_interval;
        let archive = Archive {
            parameters: DataArchive::new(&provider, flush_interval)?,
            raw_data: DataArchive::new(&provider, flush_interval)?,
            events: DataArchive::new(&provider, flush_interval)?,
            alarms: DataArchive::new(&provider, flush_interval)?,
            messages: DataArchive::new(&provider, flush_interval)?,
            ack_messages: DataArchive::new(&provider, flush_interval)?,
            activity_occurrences: DataArchive::new(&provider, flush_interval)?,
            scheduled_activities: DataArchive::new(&provider, flush_interval)?,
            provider,
        };
        tracing::info!(path = %archive.provider.database_path().display(), "archive opened");
        Ok(archive)
    }

    /// The provider minting this archive's connections.
    pub fn connection_provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    /// Dispose every per-kind archive: residual queues are flushed, timers
    /// stopped, connections closed. Failures are logged, not propagated, so
    /// one kind cannot keep the others alive.
    pub fn dispose(&self) {
        macro_rules! dispose_kind {
            ($field:ident) => {
                if !self.$field.is_disposed() {
                    if let Err(e) = self.$field.dispose() {
                        tracing::error!(error = %e, archive = stringify!($field), "dispose failed");
                    }
                }
            };
        }
        dispose_kind!(parameters);
        dispose_kind!(raw_data);
        dispose_kind!(events);
        dispose_kind!(alarms);
        dispose_kind!(messages);
        dispose_kind!(ack_messages);
        dispose_kind!(activity_occurrences);
        dispose_kind!(scheduled_activities);
        tracing::info!("archive disposed");
    }

    /// Instrumentation snapshot across every kind: queue occupancy and
    /// storage rate gauges, two per kind.
    pub fn current_debug_info(&self) -> Vec<DebugInformation> {
        let mut info = Vec::with_capacity(16);
        info.extend(self.parameters.current_debug_info());
        info.extend(self.raw_data.current_debug_info());
        info.extend(self.events.current_debug_info());
        info.extend(self.alarms.current_debug_info());
        info.extend(self.messages.current_debug_info());
        info.extend(self.ack_messages.current_debug_info());
        info.extend(self.activity_occurrences.current_debug_info());
        info.extend(self.scheduled_activities.current_debug_info());
        info
    }
}

impl Drop for Archive {
    fn drop(&mut self) {
        // Graceful teardown if the caller never disposed explicitly.
        self.dispose();
    }
}
