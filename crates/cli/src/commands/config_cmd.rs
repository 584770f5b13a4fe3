//! `tandem init` and `tandem config`: settings file commands.

use std::path::Path;

use tandem_config::{AgentSettings, TracerKind};
use tracing::info;

pub fn init(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    let content = AgentSettings::default().to_toml()?;
    std::fs::write(path, content)?;
    info!(path = %path.display(), "Settings written");
    println!("Wrote default settings to {}", path.display());
    Ok(())
}

pub fn show(path: &Path, as_toml: bool) -> Result<(), Box<dyn std::error::Error>> {
    let settings = AgentSettings::load_from(path)?;

    if as_toml {
        print!("{}", settings.to_toml()?);
        return Ok(());
    }

    println!("Settings OK: {}", path.display());
    println!();
    println!("   Agent:       {}", settings.name);
    if !settings.description.is_empty() {
        println!("   About:       {}", settings.description);
    }
    if settings.resolved_model() == settings.model {
        println!("   Model:       {}", settings.model);
    } else {
        println!("   Model:       {} -> {}", settings.model, settings.resolved_model());
    }
    println!("   Iterations:  {}", settings.iterations);
    println!("   Parallelism: {}", describe_parallelism(settings.parallelism));
    if let Some(t) = settings.temperature {
        println!("   Temperature: {t}");
    }
    println!("   Approval:    {}", describe_approval(&settings));
    println!("   Memory:      {:?}", settings.memory.backend);
    if let Some(file) = &settings.memory.file {
        println!("   Mirror:      {}", file.display());
    }
    if let Some(transcript) = &settings.memory.transcript {
        println!("   Transcript:  {}", transcript.display());
    }
    let tracer = match settings.telemetry.tracer {
        TracerKind::None => "none",
        TracerKind::Log => "log",
        TracerKind::Recording => "recording",
    };
    println!("   Tracer:      {tracer}");
    Ok(())
}

fn describe_parallelism(parallelism: i64) -> String {
    match parallelism {
        i64::MIN..=0 => "unbounded".to_string(),
        1 => "sequential".to_string(),
        n => n.to_string(),
    }
}

fn describe_approval(settings: &AgentSettings) -> String {
    if settings.approval.auto_approve_all {
        "all tools auto-approved".to_string()
    } else if settings.approval.auto_approve_tools.is_empty() {
        "every call needs approval".to_string()
    } else {
        format!("auto-approved: {}", settings.approval.auto_approve_tools.join(", "))
    }
}
