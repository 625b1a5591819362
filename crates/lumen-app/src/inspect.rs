//! `lumen index ...` - inspection and administration of the vector index.
//!
//! Output is written to the supplied writer so commands can be tested without
//! a terminal. Destructive commands report what they would remove and only
//! act with `--yes`.

use std::io::Write;

use serde_json::json;

use lumen_core::types::{PhotoRecord, SearchFilter};
use lumen_storage::SqliteQueue;
use lumen_vector::index::VectorIndex;

use crate::cli::IndexCommand;

type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Everything an index command may touch.
pub struct Inspector<'a> {
    pub index: &'a dyn VectorIndex,
    pub collection: &'a str,
    pub queue: Option<&'a SqliteQueue>,
}

impl Inspector<'_> {
    pub fn run(&self, command: IndexCommand, out: &mut dyn Write) -> CmdResult {
        match command {
            IndexCommand::Count => {
                writeln!(out, "{}", self.index.count()?)?;
            }
            IndexCommand::Stats => self.stats(out)?,
            IndexCommand::List => {
                let ids = self.index.list_ids()?;
                writeln!(out, "Total ids: {}", ids.len())?;
                for (i, id) in ids.iter().enumerate() {
                    writeln!(out, "{:4}. {}", i + 1, id)?;
                }
            }
            IndexCommand::Peek { n } => {
                let records = self.index.peek(n)?;
                if records.is_empty() {
                    writeln!(out, "Collection is empty")?;
                }
                for record in &records {
                    print_record(out, record)?;
                }
            }
            IndexCommand::Get { id } => match self.index.get(&id)? {
                Some(record) => print_record(out, &record)?,
                None => writeln!(out, "No record with id: {}", id)?,
            },
            IndexCommand::Find { predicate: (key, value) } => {
                let records = self.index.find(&SearchFilter::new().eq(key.clone(), value.clone()))?;
                writeln!(out, "Found {} records where {}={}", records.len(), key, value)?;
                for record in &records {
                    print_record(out, record)?;
                }
            }
            IndexCommand::DeleteId { id, yes } => {
                if self.index.get(&id)?.is_none() {
                    writeln!(out, "No record with id: {}", id)?;
                } else if !yes {
                    writeln!(out, "Would delete record {}; re-run with --yes to confirm", id)?;
                } else {
                    let deleted = self.index.delete(&[id.clone()])?;
                    tracing::info!(id = %id, deleted, "Record deleted");
                    writeln!(out, "Deleted {}", id)?;
                }
            }
            IndexCommand::DeleteWhere { predicate: (key, value), yes } => {
                let filter = SearchFilter::new().eq(key.clone(), value.clone());
                self.delete_matching(&filter, &format!("where {}={}", key, value), yes, out)?;
            }
            IndexCommand::DeleteAll { yes } => {
                self.delete_matching(&SearchFilter::new(), "in the collection", yes, out)?;
            }
        }
        Ok(())
    }

    fn stats(&self, out: &mut dyn Write) -> CmdResult {
        writeln!(out, "Collection: {}", self.collection)?;
        writeln!(out, "Records: {}", self.index.count()?)?;

        if let Some(sample) = self.index.peek(1)?.first() {
            writeln!(out, "Dimensions: {}", sample.vector.len())?;
            let fields: Vec<&str> = sample.metadata.keys().map(String::as_str).collect();
            writeln!(out, "Metadata fields: {}", fields.join(", "))?;
        }

        if let Some(queue) = self.queue {
            writeln!(
                out,
                "Queue {}: {} messages ({} in flight)",
                queue.name(),
                queue.len()?,
                queue.in_flight()?
            )?;
        }
        Ok(())
    }

    fn delete_matching(
        &self,
        filter: &SearchFilter,
        description: &str,
        yes: bool,
        out: &mut dyn Write,
    ) -> CmdResult {
        let found = self.index.find(filter)?.len();
        if found == 0 {
            writeln!(out, "No records {}", description)?;
        } else if !yes {
            writeln!(
                out,
                "Found {} records {}; re-run with --yes to delete them",
                found, description
            )?;
        } else {
            let deleted = self.index.delete_where(filter)?;
            tracing::info!(found, deleted, "Records deleted");
            writeln!(out, "Deleted {} records", deleted)?;
        }
        Ok(())
    }
}

fn print_record(out: &mut dyn Write, record: &PhotoRecord) -> CmdResult {
    let view = json!({
        "id": record.id,
        "dimensions": record.vector.len(),
        "metadata": record.metadata,
    });
    writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::types::{MetadataValue, PhotoMetadata};
    use lumen_vector::index::MemoryIndex;

    fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        for (id, period) in [("p1", "morning"), ("p2", "morning"), ("p3", "night")] {
            let mut m = PhotoMetadata::new();
            m.insert("period_of_day".into(), MetadataValue::from(period));
            m.insert("year".into(), MetadataValue::Int(2023));
            index.upsert(id, &[1.0, 0.0, 0.0], &m).unwrap();
        }
        index
    }

    fn run(index: &MemoryIndex, command: IndexCommand) -> String {
        let inspector = Inspector {
            index,
            collection: "photos",
            queue: None,
        };
        let mut out = Vec::new();
        inspector.run(command, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn predicate(key: &str, value: &str) -> (String, MetadataValue) {
        (key.to_string(), MetadataValue::from(value))
    }

    #[test]
    fn test_count_and_list() {
        let index = seeded();
        assert_eq!(run(&index, IndexCommand::Count).trim(), "3");
        let listing = run(&index, IndexCommand::List);
        assert!(listing.contains("Total ids: 3"));
        assert!(listing.contains("   1. p1"));
    }

    #[test]
    fn test_stats() {
        let index = seeded();
        let stats = run(&index, IndexCommand::Stats);
        assert!(stats.contains("Collection: photos"));
        assert!(stats.contains("Dimensions: 3"));
        assert!(stats.contains("Metadata fields: period_of_day, year"));
    }

    #[test]
    fn test_get_and_find() {
        let index = seeded();
        assert!(run(&index, IndexCommand::Get { id: "p1".into() }).contains("\"dimensions\": 3"));
        assert!(run(&index, IndexCommand::Get { id: "nope".into() }).contains("No record"));

        let found = run(
            &index,
            IndexCommand::Find {
                predicate: predicate("period_of_day", "morning"),
            },
        );
        assert!(found.starts_with("Found 2 records where period_of_day=morning"));
    }

    #[test]
    fn test_deletions_require_confirmation() {
        let index = seeded();

        let dry = run(
            &index,
            IndexCommand::DeleteWhere {
                predicate: predicate("period_of_day", "morning"),
                yes: false,
            },
        );
        assert!(dry.contains("Found 2 records"));
        assert_eq!(index.count().unwrap(), 3);

        run(
            &index,
            IndexCommand::DeleteWhere {
                predicate: predicate("period_of_day", "morning"),
                yes: true,
            },
        );
        assert_eq!(index.list_ids().unwrap(), vec!["p3"]);

        run(&index, IndexCommand::DeleteId { id: "p3".into(), yes: false });
        assert_eq!(index.count().unwrap(), 1);
        run(&index, IndexCommand::DeleteId { id: "p3".into(), yes: true });
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_all() {
        let index = seeded();
        let out = run(&index, IndexCommand::DeleteAll { yes: true });
        assert!(out.contains("Deleted 3 records"));
        assert!(run(&index, IndexCommand::Peek { n: 5 }).contains("Collection is empty"));
    }
}
