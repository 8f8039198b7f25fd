//! Build listing commands.

use anyhow::Result;
use runway_core::{Build, BuildId, BuildType};

use crate::client::ApiClient;

pub async fn list(
    client: &ApiClient,
    ref_filter: Option<(BuildType, String)>,
    limit: usize,
) -> Result<()> {
    let builds = match ref_filter {
        Some((build_type, ref_name)) => client.ref_builds(build_type, &ref_name, limit).await?,
        None => client.recent_builds(limit).await?,
    };

    if builds.is_empty() {
        println!("No builds");
        return Ok(());
    }
    println!(
        "{:>6}  {:<8}  {:<12}  {:<24}  {:<7}  CREATED",
        "ID", "STATUS", "TYPE", "REF", "SHA"
    );
    for build in &builds {
        println!("{}", summary_row(build));
    }
    Ok(())
}

pub async fn show(client: &ApiClient, id: BuildId) -> Result<()> {
    let build = client.build(id).await?;
    print!("{}", details(&build));
    Ok(())
}

fn summary_row(build: &Build) -> String {
    format!(
        "{:>6}  {:<8}  {:<12}  {:<24}  {:<7}  {}",
        build.id.get(),
        build.status.to_string(),
        build.build_type.to_string(),
        build.ref_name,
        build.short_sha(),
        build.created_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn details(build: &Build) -> String {
    let mut out = format!(
        "Build {}\n  status:   {}\n  type:     {}\n  ref:      {}\n  commit:   {}\n  repo:     {}\n  created:  {}\n",
        build.id,
        build.status,
        build.build_type,
        build.ref_name,
        build.commit_sha,
        build.clone_url,
        build.created_at.to_rfc3339()
    );
    if let Some(started) = build.started_at {
        out.push_str(&format!("  started:  {}\n", started.to_rfc3339()));
    }
    if let Some(finished) = build.finished_at {
        out.push_str(&format!("  finished: {}\n", finished.to_rfc3339()));
        if let Some(started) = build.started_at {
            let secs = (finished - started).num_seconds();
            out.push_str(&format!("  duration: {}s\n", secs));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_core::BuildStatus;

    fn build() -> Build {
        Build::queued(
            BuildId::new(12),
            BuildType::PullRequest,
            "https://github.com/acme/widgets.git",
            "feature",
            "0123456789abcdef",
        )
    }

    #[test]
    fn test_summary_row() {
        let row = summary_row(&build());
        assert!(row.starts_with("    12  queued    pull-request  feature"));
        assert!(row.contains("0123456"));
        assert!(!row.contains("0123456789"));
    }

    #[test]
    fn test_details_include_duration_when_finished() {
        let mut build = build();
        assert!(!details(&build).contains("duration"));

        let started = build.created_at;
        build.status = BuildStatus::Success;
        build.started_at = Some(started);
        build.finished_at = Some(started + chrono::Duration::seconds(42));
        let text = details(&build);
        assert!(text.starts_with("Build 12\n"));
        assert!(text.contains("  status:   success\n"));
        assert!(text.contains("  duration: 42s\n"));
    }
}
