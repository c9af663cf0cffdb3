use crate::service::{ChapterPatch, GraphUpdate, NotePage, Store};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tome_core::{
    Analysis, Chapter, ChapterId, FolderSet, KnowledgeGraph, Note, NoteId, Result, Summary,
    TomeError, Work, WorkId,
};

#[derive(Default)]
struct Inner {
    works: HashMap<WorkId, Work>,
    chapters: HashMap<ChapterId, Chapter>,
    summaries: HashMap<String, Summary>,
    // Secondary index: chapter_id -> summary_id
    summary_by_chapter: HashMap<ChapterId, String>,
    notes: HashMap<NoteId, Note>,
    analyses: HashMap<WorkId, Analysis>,
    graph: KnowledgeGraph,
    folders: Option<FolderSet>,
}

/// In-memory store used by tests and local development. Interior
/// mutability through a single `RwLock`; no lock is held across an await.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn delete_chapter_artifacts(inner: &mut Inner, chapter: &Chapter) {
    if let Some(summary_id) = inner.summary_by_chapter.remove(&chapter.id) {
        inner.summaries.remove(&summary_id);
    }
    let note_ids: Vec<NoteId> = inner
        .notes
        .values()
        .filter(|n| n.source.chapter_id == chapter.id)
        .map(|n| n.id.clone())
        .collect();
    for id in &note_ids {
        inner.notes.remove(id);
        inner.graph.remove_note(id);
        if let Some(folders) = inner.folders.as_mut() {
            for folder in &mut folders.folders {
                folder.note_ids.retain(|n| n != id);
            }
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_work(&self, id: &WorkId) -> Result<Option<Work>> {
        Ok(self.read().works.get(id).cloned())
    }

    async fn save_work(&self, work: &Work) -> Result<()> {
        self.write().works.insert(work.id.clone(), work.clone());
        Ok(())
    }

    async fn delete_work(&self, id: &WorkId) -> Result<()> {
        let mut inner = self.write();
        let chapters: Vec<Chapter> =
            inner.chapters.values().filter(|c| &c.work_id == id).cloned().collect();
        for chapter in &chapters {
            delete_chapter_artifacts(&mut inner, chapter);
            inner.chapters.remove(&chapter.id);
        }
        inner.analyses.remove(id);
        inner.works.remove(id);
        Ok(())
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<Option<Chapter>> {
        Ok(self.read().chapters.get(id).cloned())
    }

    async fn save_chapter(&self, chapter: &Chapter) -> Result<()> {
        self.write().chapters.insert(chapter.id.clone(), chapter.clone());
        Ok(())
    }

    async fn update_chapter(
        &self,
        id: &ChapterId,
        patch: ChapterPatch,
    ) -> Result<Option<Chapter>> {
        let mut inner = self.write();
        let Some(chapter) = inner.chapters.get_mut(id) else {
            return Ok(None);
        };
        patch.apply(chapter);
        Ok(Some(chapter.clone()))
    }

    async fn chapters_of(&self, work_id: &WorkId) -> Result<Vec<Chapter>> {
        let mut chapters: Vec<Chapter> =
            self.read().chapters.values().filter(|c| &c.work_id == work_id).cloned().collect();
        chapters.sort_by_key(|c| c.chapter_index);
        Ok(chapters)
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        Ok(self.read().summaries.get(id).cloned())
    }

    async fn get_summary_by_chapter(&self, chapter_id: &ChapterId) -> Result<Option<Summary>> {
        let inner = self.read();
        Ok(inner
            .summary_by_chapter
            .get(chapter_id)
            .and_then(|summary_id| inner.summaries.get(summary_id))
            .cloned())
    }

    async fn save_summary(&self, summary: &Summary) -> Result<()> {
        let mut inner = self.write();
        inner.summary_by_chapter.insert(summary.chapter_id.clone(), summary.id.clone());
        inner.summaries.insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        Ok(self.read().notes.get(id).cloned())
    }

    async fn save_note(&self, note: &Note) -> Result<()> {
        self.write().notes.insert(note.id.clone(), note.clone());
        Ok(())
    }

    async fn all_notes(&self) -> Result<Vec<Note>> {
        Ok(self.read().notes.values().cloned().collect())
    }

    async fn notes_by_chapter(
        &self,
        work_id: &WorkId,
        chapter_id: &ChapterId,
    ) -> Result<Vec<Note>> {
        Ok(self
            .read()
            .notes
            .values()
            .filter(|n| &n.source.work_id == work_id && &n.source.chapter_id == chapter_id)
            .cloned()
            .collect())
    }

    async fn delete_notes_by_chapter(
        &self,
        work_id: &WorkId,
        chapter_id: &ChapterId,
    ) -> Result<()> {
        let mut inner = self.write();
        let note_ids: Vec<NoteId> = inner
            .notes
            .values()
            .filter(|n| &n.source.work_id == work_id && &n.source.chapter_id == chapter_id)
            .map(|n| n.id.clone())
            .collect();
        for id in &note_ids {
            inner.notes.remove(id);
            inner.graph.remove_note(id);
            if let Some(folders) = inner.folders.as_mut() {
                for folder in &mut folders.folders {
                    folder.note_ids.retain(|n| n != id);
                }
            }
        }
        Ok(())
    }

    async fn list_notes(&self, page: u32, limit: u32, search: Option<&str>) -> Result<NotePage> {
        if limit == 0 {
            return Err(TomeError::Store("list_notes limit must be positive".into()));
        }
        let page = page.max(1);
        let needle = search.map(str::to_lowercase);
        let inner = self.read();
        let mut matched: Vec<Note> = inner
            .notes
            .values()
            .filter(|n| match &needle {
                Some(needle) => {
                    n.title.to_lowercase().contains(needle)
                        || n.content.to_lowercase().contains(needle)
                }
                None => true,
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.created_at.cmp(&a.created_at).then_with(|| a.id.as_ref().cmp(b.id.as_ref()))
        });

        let total = matched.len() as u64;
        let start = ((page - 1) as usize).saturating_mul(limit as usize);
        let notes = matched.into_iter().skip(start).take(limit as usize).collect();
        Ok(NotePage { notes, total, page, limit })
    }

    async fn get_analysis(&self, work_id: &WorkId) -> Result<Option<Analysis>> {
        Ok(self.read().analyses.get(work_id).cloned())
    }

    async fn save_analysis(&self, analysis: &Analysis) -> Result<()> {
        self.write().analyses.insert(analysis.work_id.clone(), analysis.clone());
        Ok(())
    }

    async fn get_graph(&self) -> Result<KnowledgeGraph> {
        Ok(self.read().graph.clone())
    }

    async fn update_graph(&self, update: GraphUpdate) -> Result<KnowledgeGraph> {
        let mut inner = self.write();
        update(&mut inner.graph);
        Ok(inner.graph.clone())
    }

    async fn get_folders(&self) -> Result<Option<FolderSet>> {
        Ok(self.read().folders.clone())
    }

    async fn save_folders(&self, folders: &FolderSet) -> Result<()> {
        self.write().folders = Some(folders.clone());
        Ok(())
    }
}
