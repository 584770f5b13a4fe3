//! Building agents from [`AgentSettings`].

use std::sync::Arc;

use tandem_config::{AgentSettings, MemoryBackend, MemorySettings, TracerKind};
use tandem_core::error::MemoryError;
use tandem_core::memory::Memory;
use tandem_memory::{FileMemory, ForgetfulMemory, StaticMemory};
use tandem_telemetry::{LogTracer, RecordingTracer};
use tracing::debug;

use crate::agent::Agent;

impl Agent {
    /// Apply settings on top of the current configuration.
    ///
    /// Memory is not touched here since building it may read from disk;
    /// see [`memory_from_settings`].
    pub fn with_settings(self, settings: &AgentSettings) -> Self {
        let mut agent = self.with_model(&settings.model);
        if !settings.name.is_empty() {
            agent = agent.with_name(&settings.name);
        }
        if !settings.description.is_empty() {
            agent = agent.with_description(&settings.description);
        }
        if !settings.models.is_empty() {
            let aliases = settings.models.clone();
            agent = agent.with_model_mapper(move |alias| aliases.get(alias).cloned());
        }
        if let Some(prompt) = &settings.system_prompt {
            agent = agent.with_system_message(prompt);
        }
        if let Some(temperature) = settings.temperature {
            agent = agent.with_temperature(temperature);
        }
        if let Some(top_p) = settings.top_p {
            agent = agent.with_top_p(top_p);
        }
        if let Some(top_k) = settings.top_k {
            agent = agent.with_top_k(top_k);
        }
        if let Some(max_tokens) = settings.max_tokens {
            agent = agent.with_max_tokens(max_tokens);
        }
        agent = agent
            .with_iterations(settings.iterations)
            .with_tool_parallelism(settings.parallelism)
            .with_strict_iterations(settings.strict_iterations);
        if settings.structured_output {
            agent = agent.with_structured_output();
        }
        if settings.approval.auto_approve_all {
            agent = agent.with_auto_approve_all();
        }
        if !settings.approval.auto_approve_tools.is_empty() {
            agent = agent.with_auto_approve_tools(settings.approval.auto_approve_tools.clone());
        }
        match settings.telemetry.tracer {
            TracerKind::None => agent,
            TracerKind::Log => agent.with_tracer(Arc::new(LogTracer)),
            TracerKind::Recording => agent.with_tracer(Arc::new(RecordingTracer::new())),
        }
    }
}

/// Build the memory described by `settings`, restoring a mirrored
/// conversation from disk when one is configured.
pub async fn memory_from_settings(settings: &MemorySettings) -> Result<Arc<dyn Memory>, MemoryError> {
    let base: Arc<dyn Memory> = match settings.backend {
        MemoryBackend::Static => Arc::new(StaticMemory::new()),
        MemoryBackend::Forgetful => Arc::new(ForgetfulMemory::new()),
    };

    let memory: Arc<dyn Memory> = match (&settings.file, &settings.transcript) {
        (Some(file), transcript) => {
            let mut mirrored = FileMemory::restore(file, base).await?;
            if let Some(transcript) = transcript {
                mirrored = mirrored.with_transcript(transcript);
            }
            debug!(path = %file.display(), "Memory mirrored to file");
            Arc::new(mirrored)
        }
        (None, Some(transcript)) => Arc::new(FileMemory::transcript_only(transcript, base)),
        (None, None) => base,
    };
    Ok(memory)
}
