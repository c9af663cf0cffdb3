use crate::service::{ChapterPatch, GraphUpdate, NotePage, Store};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc, to_bson};
use mongodb::options::ReturnDocument;
use mongodb::{Client, Collection, Database};
use serde::{Deserialize, Serialize};
use tome_core::{
    Analysis, Chapter, ChapterId, FolderSet, KnowledgeGraph, Note, NoteId, Result, Summary,
    TomeError, Work, WorkId,
};

const GRAPH_DOC_ID: &str = "knowledge-graph";
const FOLDERS_DOC_ID: &str = "folders";

#[derive(Debug, Serialize, Deserialize)]
struct GraphDoc {
    #[serde(rename = "_id")]
    id: String,
    graph: KnowledgeGraph,
}

#[derive(Debug, Serialize, Deserialize)]
struct FoldersDoc {
    #[serde(rename = "_id")]
    id: String,
    folders: FolderSet,
}

/// MongoDB-backed store. Entity writes are per-id upserts; the graph and
/// folder singletons are replaced whole, with graph mutations serialized
/// through a process-level mutex (one worker per queue).
pub struct MongoStore {
    db: Database,
    graph_lock: tokio::sync::Mutex<()>,
}

fn store_err(e: impl std::fmt::Display) -> TomeError {
    TomeError::Store(e.to_string())
}

fn escape_regex(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl MongoStore {
    /// Connect and select the database. The URI comes from configuration;
    /// no connection is attempted until the first operation for some
    /// topologies, so failures may surface late as `Store` errors.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri).await.map_err(store_err)?;
        Ok(Self { db: client.database(database), graph_lock: tokio::sync::Mutex::new(()) })
    }

    fn works(&self) -> Collection<Work> {
        self.db.collection("works")
    }

    fn chapters(&self) -> Collection<Chapter> {
        self.db.collection("chapters")
    }

    fn summaries(&self) -> Collection<Summary> {
        self.db.collection("summaries")
    }

    fn notes(&self) -> Collection<Note> {
        self.db.collection("notes")
    }

    fn analyses(&self) -> Collection<Analysis> {
        self.db.collection("analyses")
    }

    fn graph(&self) -> Collection<GraphDoc> {
        self.db.collection("graph")
    }

    fn folders(&self) -> Collection<FoldersDoc> {
        self.db.collection("folders")
    }

    async fn prune_graph_for_notes(&self, note_ids: &[NoteId]) -> Result<()> {
        if note_ids.is_empty() {
            return Ok(());
        }
        let ids = note_ids.to_vec();
        self.update_graph(Box::new(move |graph| {
            for id in &ids {
                graph.remove_note(id);
            }
        }))
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn get_work(&self, id: &WorkId) -> Result<Option<Work>> {
        self.works().find_one(doc! { "id": id.as_str() }).await.map_err(store_err)
    }

    async fn save_work(&self, work: &Work) -> Result<()> {
        self.works()
            .replace_one(doc! { "id": work.id.as_str() }, work)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn delete_work(&self, id: &WorkId) -> Result<()> {
        let chapters = self.chapters_of(id).await?;
        for chapter in &chapters {
            self.delete_notes_by_chapter(id, &chapter.id).await?;
            self.summaries()
                .delete_many(doc! { "chapterId": chapter.id.as_str() })
                .await
                .map_err(store_err)?;
        }
        self.chapters().delete_many(doc! { "workId": id.as_str() }).await.map_err(store_err)?;
        self.analyses().delete_many(doc! { "workId": id.as_str() }).await.map_err(store_err)?;
        self.works().delete_many(doc! { "id": id.as_str() }).await.map_err(store_err)?;
        Ok(())
    }

    async fn get_chapter(&self, id: &ChapterId) -> Result<Option<Chapter>> {
        self.chapters().find_one(doc! { "id": id.as_str() }).await.map_err(store_err)
    }

    async fn save_chapter(&self, chapter: &Chapter) -> Result<()> {
        self.chapters()
            .replace_one(doc! { "id": chapter.id.as_str() }, chapter)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn update_chapter(
        &self,
        id: &ChapterId,
        patch: ChapterPatch,
    ) -> Result<Option<Chapter>> {
        let mut set = Document::new();
        if let Some(s) = patch.overview_status {
            set.insert("overviewStatus", to_bson(&s).map_err(store_err)?);
        }
        if let Some(s) = patch.analysis_status {
            set.insert("analysisStatus", to_bson(&s).map_err(store_err)?);
        }
        if let Some(s) = patch.notes_status {
            set.insert("notesStatus", to_bson(&s).map_err(store_err)?);
        }
        if let Some(s) = patch.status {
            set.insert("status", to_bson(&s).map_err(store_err)?);
        }
        if let Some(ref summary_ref) = patch.summary_ref {
            set.insert("summaryRef", summary_ref.clone());
        }
        if let Some(ref last_error) = patch.last_error {
            match last_error {
                Some(message) => set.insert("lastError", message.clone()),
                None => set.insert("lastError", Bson::Null),
            };
        }
        set.insert("updatedAt", to_bson(&chrono::Utc::now()).map_err(store_err)?);

        self.chapters()
            .find_one_and_update(doc! { "id": id.as_str() }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(store_err)
    }

    async fn chapters_of(&self, work_id: &WorkId) -> Result<Vec<Chapter>> {
        let cursor = self
            .chapters()
            .find(doc! { "workId": work_id.as_str() })
            .sort(doc! { "chapterIndex": 1 })
            .await
            .map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }

    async fn get_summary(&self, id: &str) -> Result<Option<Summary>> {
        self.summaries().find_one(doc! { "id": id }).await.map_err(store_err)
    }

    async fn get_summary_by_chapter(&self, chapter_id: &ChapterId) -> Result<Option<Summary>> {
        self.summaries()
            .find_one(doc! { "chapterId": chapter_id.as_str() })
            .await
            .map_err(store_err)
    }

    async fn save_summary(&self, summary: &Summary) -> Result<()> {
        self.summaries()
            .replace_one(doc! { "id": &summary.id }, summary)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_note(&self, id: &NoteId) -> Result<Option<Note>> {
        self.notes().find_one(doc! { "id": id.as_str() }).await.map_err(store_err)
    }

    async fn save_note(&self, note: &Note) -> Result<()> {
        self.notes()
            .replace_one(doc! { "id": note.id.as_str() }, note)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn all_notes(&self) -> Result<Vec<Note>> {
        let cursor = self.notes().find(doc! {}).await.map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }

    async fn notes_by_chapter(
        &self,
        work_id: &WorkId,
        chapter_id: &ChapterId,
    ) -> Result<Vec<Note>> {
        let filter = doc! {
            "source.workId": work_id.as_str(),
            "source.chapterId": chapter_id.as_str(),
        };
        let cursor = self.notes().find(filter).await.map_err(store_err)?;
        cursor.try_collect().await.map_err(store_err)
    }

    async fn delete_notes_by_chapter(
        &self,
        work_id: &WorkId,
        chapter_id: &ChapterId,
    ) -> Result<()> {
        let notes = self.notes_by_chapter(work_id, chapter_id).await?;
        let note_ids: Vec<NoteId> = notes.into_iter().map(|n| n.id).collect();
        self.prune_graph_for_notes(&note_ids).await?;
        self.notes()
            .delete_many(doc! {
                "source.workId": work_id.as_str(),
                "source.chapterId": chapter_id.as_str(),
            })
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn list_notes(&self, page: u32, limit: u32, search: Option<&str>) -> Result<NotePage> {
        if limit == 0 {
            return Err(TomeError::Store("list_notes limit must be positive".into()));
        }
        let page = page.max(1);
        let filter = match search {
            Some(needle) if !needle.is_empty() => {
                let pattern = escape_regex(needle);
                doc! {
                    "$or": [
                        { "title": { "$regex": &pattern, "$options": "i" } },
                        { "content": { "$regex": &pattern, "$options": "i" } },
                    ]
                }
            }
            _ => doc! {},
        };

        let total =
            self.notes().count_documents(filter.clone()).await.map_err(store_err)?;
        let cursor = self
            .notes()
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .skip(u64::from(page - 1) * u64::from(limit))
            .limit(i64::from(limit))
            .await
            .map_err(store_err)?;
        let notes = cursor.try_collect().await.map_err(store_err)?;
        Ok(NotePage { notes, total, page, limit })
    }

    async fn get_analysis(&self, work_id: &WorkId) -> Result<Option<Analysis>> {
        self.analyses().find_one(doc! { "workId": work_id.as_str() }).await.map_err(store_err)
    }

    async fn save_analysis(&self, analysis: &Analysis) -> Result<()> {
        self.analyses()
            .replace_one(doc! { "workId": analysis.work_id.as_str() }, analysis)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_graph(&self) -> Result<KnowledgeGraph> {
        let found =
            self.graph().find_one(doc! { "_id": GRAPH_DOC_ID }).await.map_err(store_err)?;
        Ok(found.map(|d| d.graph).unwrap_or_default())
    }

    async fn update_graph(&self, update: GraphUpdate) -> Result<KnowledgeGraph> {
        let _guard = self.graph_lock.lock().await;
        let mut graph = self.get_graph().await?;
        update(&mut graph);
        let doc = GraphDoc { id: GRAPH_DOC_ID.to_string(), graph };
        self.graph()
            .replace_one(doc! { "_id": GRAPH_DOC_ID }, &doc)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(doc.graph)
    }

    async fn get_folders(&self) -> Result<Option<FolderSet>> {
        let found =
            self.folders().find_one(doc! { "_id": FOLDERS_DOC_ID }).await.map_err(store_err)?;
        Ok(found.map(|d| d.folders))
    }

    async fn save_folders(&self, folders: &FolderSet) -> Result<()> {
        let doc = FoldersDoc { id: FOLDERS_DOC_ID.to_string(), folders: folders.clone() };
        self.folders()
            .replace_one(doc! { "_id": FOLDERS_DOC_ID }, &doc)
            .upsert(true)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
