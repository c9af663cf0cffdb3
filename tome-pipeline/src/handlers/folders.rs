use crate::context::PipelineContext;
use rand::seq::IndexedRandom;
use std::time::Duration;
use tome_core::{Event, FolderCandidate, FolderSet, Note, Result, UNCATEGORIZED};

const BATCH_SIZE: usize = 20;
const BATCH_ATTEMPTS: u32 = 3;
const TAXONOMY_SAMPLE: usize = 100;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Fallback taxonomy when no prior folders exist and the naming call
/// fails.
const DEFAULT_FOLDER_NAMES: &[&str] = &[
    "Philosophy",
    "Psychology",
    "Science",
    "History",
    "Business",
    "Productivity",
    "Health",
    "Relationships",
    "Creativity",
    "Society",
];

/// Folder-organize stage: partition all notes into a thematic taxonomy,
/// batch by batch, persisting and reporting progress after every batch.
/// Resumable: prior assignments are kept and only the complement is
/// processed.
pub(crate) async fn run(ctx: &PipelineContext) -> Result<()> {
    let Some(_guard) = ctx.try_begin_organize() else {
        tracing::warn!("folder organize rejected: already in progress");
        ctx.emit(Event::FoldersError { error: "already in progress".into() }).await;
        return Ok(());
    };

    ctx.emit(Event::FoldersProcessing { message: "organizing notes into folders".into() }).await;

    let notes = ctx.store.all_notes().await?;
    let prior = ctx.store.get_folders().await?.unwrap_or_default();

    if notes.is_empty() {
        ctx.emit(Event::FoldersDone { folders: prior, message: "no notes to organize".into() })
            .await;
        return Ok(());
    }

    let mut taxonomy = prior.taxonomy();
    if taxonomy.is_empty() {
        taxonomy = fresh_taxonomy(ctx, &notes).await;
    } else {
        tracing::info!(folders = taxonomy.len(), "reusing prior folder taxonomy");
    }

    let mut folders = prior;
    folders.ensure_folders(&taxonomy);

    let assigned = folders.assigned_ids();
    let mut to_assign: Vec<&Note> =
        notes.iter().filter(|n| !assigned.contains(&n.id)).collect();
    // Stable batch boundaries across retries of the same corpus.
    to_assign.sort_by(|a, b| {
        a.created_at.cmp(&b.created_at).then_with(|| a.id.as_ref().cmp(b.id.as_ref()))
    });

    let total = to_assign.len().div_ceil(BATCH_SIZE) as u32;
    tracing::info!(notes = to_assign.len(), batches = total, "folder assignment starting");

    for (index, batch) in to_assign.chunks(BATCH_SIZE).enumerate() {
        let current = index as u32 + 1;
        assign_batch(ctx, batch, &taxonomy, &mut folders).await;

        ctx.store.save_folders(&folders).await?;
        ctx.emit(Event::FoldersProgress {
            current,
            total,
            folders: folders.clone(),
            message: format!("organized batch {current} of {total}"),
        })
        .await;
    }

    ctx.store.save_folders(&folders).await?;
    ctx.emit(Event::FoldersDone { folders, message: "folder organization complete".into() })
        .await;
    tracing::info!("folder organization complete");
    Ok(())
}

/// Sample up to 100 titles and ask the model for folder names; fall back
/// to the built-in list when the call fails or returns nothing.
async fn fresh_taxonomy(ctx: &PipelineContext, notes: &[Note]) -> Vec<String> {
    let titles: Vec<String> = notes.iter().map(|n| n.title.clone()).collect();
    let sample: Vec<String> = titles
        .choose_multiple(&mut rand::rng(), TAXONOMY_SAMPLE)
        .cloned()
        .collect();

    match ctx.gateway.suggest_folder_names(&sample).await {
        Ok(names) if !names.is_empty() => {
            let mut names: Vec<String> =
                names.into_iter().filter(|n| n != UNCATEGORIZED).collect();
            names.truncate(12);
            names
        }
        Ok(_) => {
            tracing::warn!("taxonomy call returned no names; using defaults");
            DEFAULT_FOLDER_NAMES.iter().map(|s| s.to_string()).collect()
        }
        Err(e) => {
            tracing::warn!(error = %e, "taxonomy call failed; using defaults");
            DEFAULT_FOLDER_NAMES.iter().map(|s| s.to_string()).collect()
        }
    }
}

/// Assign one batch, retrying the whole batch on failure; when retries run
/// out the batch lands in "Uncategorized".
async fn assign_batch(
    ctx: &PipelineContext,
    batch: &[&Note],
    taxonomy: &[String],
    folders: &mut FolderSet,
) {
    let candidates: Vec<FolderCandidate> = batch
        .iter()
        .map(|n| FolderCandidate { id: n.id.clone(), title: n.title.clone() })
        .collect();

    let mut assignments = None;
    for attempt in 1..=BATCH_ATTEMPTS {
        match ctx.gateway.assign_folder_batch(&candidates, taxonomy).await {
            Ok(result) => {
                assignments = Some(result);
                break;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "folder batch assignment failed");
                if attempt < BATCH_ATTEMPTS {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }

    match assignments {
        Some(assignments) => {
            for note in batch {
                let folder = assignments
                    .iter()
                    .find(|a| a.id == note.id)
                    .map(|a| a.folder.as_str())
                    // Unknown names would grow the taxonomy unbounded.
                    .filter(|name| taxonomy.iter().any(|t| t == name))
                    .unwrap_or(UNCATEGORIZED);
                folders.assign(folder, note.id.clone());
            }
        }
        None => {
            for note in batch {
                folders.assign(UNCATEGORIZED, note.id.clone());
            }
        }
    }
}
