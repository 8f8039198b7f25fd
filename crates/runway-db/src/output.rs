//! Append-only build output log.

use std::ops::ControlFlow;

use runway_core::{Build, BuildId, Channel, OutputLine};
use serde::{Deserialize, Serialize};

use crate::builds::read_build;
use crate::schema::Bucket;
use crate::store::{Order, ReadTx, WriteTx};
use crate::{Db, DbError, DbResult};

/// Stored form of a line; the build and line IDs live in the key.
#[derive(Serialize, Deserialize)]
struct StoredLine {
    channel: Channel,
    content: String,
}

fn append(tx: &mut WriteTx, build_id: BuildId, channel: Channel, content: String) -> DbResult<u64> {
    let bucket = Bucket::Output(build_id);
    let line_id = tx.next_sequence(&bucket)? - 1;
    let value = serde_json::to_vec(&StoredLine { channel, content })?;
    tx.put(&bucket, line_id, &value)?;
    Ok(line_id)
}

impl Db {
    /// Append one line to a build's output and return its line ID.
    pub fn append_output(
        &self,
        build_id: BuildId,
        channel: Channel,
        content: impl Into<String>,
    ) -> DbResult<u64> {
        let content = content.into();
        self.store()
            .update(|tx| append(tx, build_id, channel, content))
    }

    /// Append several lines in one transaction, returning their line IDs.
    pub fn append_outputs(
        &self,
        build_id: BuildId,
        lines: Vec<(Channel, String)>,
    ) -> DbResult<Vec<u64>> {
        if lines.is_empty() {
            return Ok(Vec::new());
        }
        self.store().update(|tx| {
            lines
                .into_iter()
                .map(|(channel, content)| append(tx, build_id, channel, content))
                .collect()
        })
    }

    /// Lines with IDs in `[start, end)`, or from `start` onwards when
    /// `end == -1`.
    pub fn read_outputs(&self, build_id: BuildId, start: i64, end: i64) -> DbResult<Vec<OutputLine>> {
        let window = output_window(start, end)?;
        self.store()
            .view(|tx| read_window(tx, build_id, window))
    }

    /// A build together with a window of its output, read from one snapshot.
    ///
    /// Pollers use the status to decide whether to ask again; reading both
    /// at once means a terminal status is never paired with missing lines.
    pub fn build_output(
        &self,
        build_id: BuildId,
        start: i64,
        end: i64,
    ) -> DbResult<(Build, Vec<OutputLine>)> {
        let window = output_window(start, end)?;
        self.store().view(|tx| {
            let build = read_build(tx, build_id)?;
            let lines = read_window(tx, build_id, window)?;
            Ok((build, lines))
        })
    }
}

/// Validated `[start, end)` line window; `None` when empty.
fn output_window(start: i64, end: i64) -> DbResult<Option<(u64, Option<u64>)>> {
    if start < 0 {
        return Err(DbError::InvalidRange(format!(
            "invalid argument start: {}",
            start
        )));
    }
    if end < -1 {
        return Err(DbError::InvalidRange(format!("invalid argument end: {}", end)));
    }
    if end >= 0 && start >= end {
        return Ok(None);
    }
    Ok(Some((start as u64, (end >= 0).then_some(end as u64))))
}

fn read_window(
    tx: &mut ReadTx,
    build_id: BuildId,
    window: Option<(u64, Option<u64>)>,
) -> DbResult<Vec<OutputLine>> {
    let mut lines = Vec::new();
    let Some((start, end)) = window else {
        return Ok(lines);
    };

    let bucket = Bucket::Output(build_id);
    let mut visit = |line_id: u64, value: &[u8]| -> DbResult<ControlFlow<()>> {
        let stored: StoredLine = serde_json::from_slice(value)?;
        lines.push(OutputLine {
            build_id,
            line_id,
            channel: stored.channel,
            content: stored.content,
        });
        Ok(ControlFlow::Continue(()))
    };
    match end {
        Some(end) => tx.cursor(&bucket, start..end, Order::Ascending, &mut visit)?,
        None => tx.cursor(&bucket, start.., Order::Ascending, &mut visit)?,
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_core::BuildType;
    use tempfile::TempDir;

    fn open_db() -> (TempDir, Db) {
        let dir = TempDir::new().unwrap();
        let db = Db::open(dir.path().join("runway.redb")).unwrap();
        (dir, db)
    }

    fn contents(lines: &[OutputLine]) -> Vec<&str> {
        lines.iter().map(|l| l.content.as_str()).collect()
    }

    #[test]
    fn test_line_ids_are_contiguous_from_zero() {
        let (_dir, db) = open_db();
        let build = db.create_build(BuildType::Push, "u", "main", "s").unwrap();

        let first = db.append_output(build.id, Channel::CiInfo, "cloning").unwrap();
        let batch = db
            .append_outputs(
                build.id,
                vec![
                    (Channel::Stdout, "compiling".to_string()),
                    (Channel::Stderr, "warning".to_string()),
                ],
            )
            .unwrap();
        let last = db.append_output(build.id, Channel::CiInfo, "done").unwrap();

        assert_eq!(first, 0);
        assert_eq!(batch, vec![1, 2]);
        assert_eq!(last, 3);

        let lines = db.read_outputs(build.id, 0, -1).unwrap();
        let ids: Vec<u64> = lines.iter().map(|l| l.line_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(lines[2].channel, Channel::Stderr);
        assert!(lines.iter().all(|l| l.build_id == build.id));
    }

    #[test]
    fn test_read_window() {
        let (_dir, db) = open_db();
        let id = BuildId::new(1);
        for n in 0..5 {
            db.append_output(id, Channel::Stdout, format!("line {n}")).unwrap();
        }

        let window = db.read_outputs(id, 1, 3).unwrap();
        assert_eq!(contents(&window), vec!["line 1", "line 2"]);

        let tail = db.read_outputs(id, 3, -1).unwrap();
        assert_eq!(contents(&tail), vec!["line 3", "line 4"]);

        assert!(db.read_outputs(id, 5, -1).unwrap().is_empty());
        assert!(db.read_outputs(id, 2, 2).unwrap().is_empty());
        assert_eq!(db.read_outputs(id, 4, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_builds_have_separate_logs() {
        let (_dir, db) = open_db();
        db.append_output(BuildId::new(1), Channel::Stdout, "one").unwrap();
        let id = db.append_output(BuildId::new(2), Channel::Stdout, "two").unwrap();
        assert_eq!(id, 0);
        assert_eq!(contents(&db.read_outputs(BuildId::new(2), 0, -1).unwrap()), vec!["two"]);
    }

    #[test]
    fn test_no_output_yet() {
        let (_dir, db) = open_db();
        assert!(db.read_outputs(BuildId::new(7), 0, -1).unwrap().is_empty());
    }

    #[test]
    fn test_build_output_snapshot() {
        let (_dir, db) = open_db();
        let build = db.create_build(BuildType::Push, "u", "main", "s").unwrap();
        db.append_output(build.id, Channel::CiInfo, "cloning").unwrap();
        db.append_output(build.id, Channel::Stdout, "ok").unwrap();

        let (found, lines) = db.build_output(build.id, 1, -1).unwrap();
        assert_eq!(found, build);
        assert_eq!(contents(&lines), vec!["ok"]);

        assert!(matches!(
            db.build_output(BuildId::new(99), 0, -1),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_bounds() {
        let (_dir, db) = open_db();
        assert!(matches!(
            db.read_outputs(BuildId::new(1), -1, -1),
            Err(DbError::InvalidRange(_))
        ));
        assert!(matches!(
            db.read_outputs(BuildId::new(1), 0, -5),
            Err(DbError::InvalidRange(_))
        ));
    }
}
