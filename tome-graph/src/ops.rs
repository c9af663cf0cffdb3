use tome_core::{EdgeDirection, EdgeOrigin, GraphEdge, NoteId, Result, TomeError};
use tome_store::Store;

/// One resolved link endpoint as the UI renders it.
#[derive(Debug, Clone)]
pub struct LinkEndpoint {
    pub note_id: NoteId,
    pub title: String,
    pub reason: String,
    pub created_by: EdgeOrigin,
    pub confidence: f32,
    pub direction: EdgeDirection,
}

#[derive(Debug, Clone, Default)]
pub struct NoteLinks {
    pub outgoing: Vec<LinkEndpoint>,
    pub incoming: Vec<LinkEndpoint>,
}

/// Insert an edge unless it already exists. For bidirectional edges the
/// reverse orientation also counts as existing. Both endpoints must have
/// graph nodes.
pub async fn add_edge(
    store: &dyn Store,
    from: NoteId,
    to: NoteId,
    reason: impl Into<String>,
    created_by: EdgeOrigin,
    confidence: f32,
    direction: EdgeDirection,
) -> Result<()> {
    let graph = store.get_graph().await?;
    for id in [&from, &to] {
        if !graph.nodes.contains_key(id) {
            return Err(TomeError::EntityMissing(format!("graph node {id}")));
        }
    }

    let reason = reason.into();
    store
        .update_graph(Box::new(move |graph| {
            if graph.has_edge(&from, &to) {
                return;
            }
            if direction == EdgeDirection::Bidirectional && graph.has_edge(&to, &from) {
                return;
            }
            if !graph.nodes.contains_key(&from) || !graph.nodes.contains_key(&to) {
                return;
            }
            graph.edges.push(GraphEdge { from, to, reason, created_by, confidence, direction });
        }))
        .await?;
    Ok(())
}

/// Remove the edge in both orientations.
pub async fn remove_edge(store: &dyn Store, from: NoteId, to: NoteId) -> Result<()> {
    store
        .update_graph(Box::new(move |graph| {
            graph.edges.retain(|e| {
                !(e.from == from && e.to == to) && !(e.from == to && e.to == from)
            });
        }))
        .await?;
    Ok(())
}

/// Every edge touching a note, split by orientation, with endpoint titles
/// resolved from the note documents and falling back to the cached graph
/// node title.
pub async fn links_of(store: &dyn Store, note_id: &NoteId) -> Result<NoteLinks> {
    let graph = store.get_graph().await?;
    let mut links = NoteLinks::default();

    for edge in &graph.edges {
        let (other, outgoing) = if &edge.from == note_id {
            (&edge.to, true)
        } else if &edge.to == note_id {
            (&edge.from, false)
        } else {
            continue;
        };

        let title = match store.get_note(other).await? {
            Some(note) => note.title,
            None => graph
                .nodes
                .get(other)
                .map(|node| node.title.clone())
                .unwrap_or_else(|| other.to_string()),
        };
        let endpoint = LinkEndpoint {
            note_id: other.clone(),
            title,
            reason: edge.reason.clone(),
            created_by: edge.created_by,
            confidence: edge.confidence,
            direction: edge.direction,
        };
        if outgoing {
            links.outgoing.push(endpoint);
        } else {
            links.incoming.push(endpoint);
        }
    }
    Ok(links)
}
