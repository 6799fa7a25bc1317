//! Schema types for edge CRUD and incremental propagation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cbam_core::edge::{Edge, EdgeKind, EdgeUpdate, NewEdge};
use cbam_core::node::NodeKind;
use cbam_core::result::PropagationResult;
use cbam_storage::EdgeFilter;

use super::common::parse_node;
use crate::error::ApiError;

/// `POST /edges` body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEdgeRequest {
    pub source_kind: String,
    pub source_id: i64,
    pub target_kind: String,
    pub target_id: i64,
    pub edge_kind: String,
}

impl CreateEdgeRequest {
    pub fn to_new_edge(&self) -> Result<NewEdge, ApiError> {
        let source = parse_node(&self.source_kind, self.source_id)?;
        let target = parse_node(&self.target_kind, self.target_id)?;
        let kind: EdgeKind = self.edge_kind.parse()?;
        Ok(NewEdge::new(source, target, kind)?)
    }
}

/// `PUT /edges/{id}` body. Omitted fields keep their current value; an id
/// given without its kind keeps the current kind of that endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEdgeRequest {
    pub source_kind: Option<String>,
    pub source_id: Option<i64>,
    pub target_kind: Option<String>,
    pub target_id: Option<i64>,
    pub edge_kind: Option<String>,
}

impl UpdateEdgeRequest {
    /// Resolves the request against the edge as currently stored.
    pub fn to_update(&self, current: &Edge) -> Result<EdgeUpdate, ApiError> {
        let endpoint = |kind: &Option<String>, id: Option<i64>, fallback: cbam_core::NodeRef| {
            if kind.is_none() && id.is_none() {
                return Ok(None);
            }
            let kind = match kind {
                Some(k) => k.clone(),
                None => fallback.kind.as_str().to_string(),
            };
            parse_node(&kind, id.unwrap_or(fallback.id)).map(Some)
        };
        Ok(EdgeUpdate {
            source: endpoint(&self.source_kind, self.source_id, current.source)?,
            target: endpoint(&self.target_kind, self.target_id, current.target)?,
            kind: self
                .edge_kind
                .as_deref()
                .map(str::parse::<EdgeKind>)
                .transpose()?,
        })
    }
}

/// `GET /edges` query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEdgesQuery {
    pub edge_kind: Option<String>,
    pub node_kind: Option<String>,
    pub node_id: Option<i64>,
}

impl ListEdgesQuery {
    pub fn to_filter(&self) -> Result<EdgeFilter, ApiError> {
        let kind = self
            .edge_kind
            .as_deref()
            .map(str::parse::<EdgeKind>)
            .transpose()?;
        let node = match (&self.node_kind, self.node_id) {
            (Some(k), Some(id)) => Some(parse_node(k, id)?),
            (None, None) => None,
            _ => {
                return Err(ApiError::BadRequest(
                    "node_kind and node_id must be given together".to_string(),
                ))
            }
        };
        Ok(EdgeFilter {
            kind,
            node,
            ..Default::default()
        })
    }
}

/// `POST /edges/propagate` query string.
#[derive(Debug, Clone, Deserialize)]
pub struct PropagateQuery {
    pub source_process_id: i64,
    pub target_process_id: i64,
}

/// An edge as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeView {
    pub id: i64,
    pub source_kind: NodeKind,
    pub source_id: i64,
    pub target_kind: NodeKind,
    pub target_id: i64,
    pub edge_kind: EdgeKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Edge> for EdgeView {
    fn from(edge: Edge) -> Self {
        EdgeView {
            id: edge.id.0,
            source_kind: edge.source.kind,
            source_id: edge.source.id,
            target_kind: edge.target.kind,
            target_id: edge.target.id,
            edge_kind: edge.kind,
            created_at: edge.created_at,
            updated_at: edge.updated_at,
        }
    }
}

/// Response of edge create/update: the edge and the propagation it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeMutationResponse {
    pub edge: EdgeView,
    pub propagation: PropagationResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEdgesResponse {
    pub edges: Vec<EdgeView>,
}

/// `POST /edges/propagate` response.
#[derive(Debug, Clone, Serialize)]
pub struct PropagateResponse {
    pub edge: EdgeView,
    /// Whether the continue edge had to be created.
    pub created: bool,
    pub propagation: PropagationResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbam_core::id::{EdgeId, ProcessId};
    use cbam_core::node::NodeRef;

    fn stored() -> Edge {
        let now = Utc::now();
        Edge {
            id: EdgeId(1),
            source: NodeRef::process(ProcessId(1)),
            target: NodeRef::process(ProcessId(2)),
            kind: EdgeKind::Continue,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn update_id_only_keeps_kind() {
        let req = UpdateEdgeRequest {
            target_id: Some(9),
            ..Default::default()
        };
        let update = req.to_update(&stored()).unwrap();
        assert_eq!(update.target, Some(NodeRef::process(ProcessId(9))));
        assert!(update.source.is_none());
        assert!(update.kind.is_none());
    }

    #[test]
    fn create_rejects_unknown_kind() {
        let req = CreateEdgeRequest {
            source_kind: "process".into(),
            source_id: 1,
            target_kind: "process".into(),
            target_id: 2,
            edge_kind: "flows".into(),
        };
        assert!(matches!(req.to_new_edge(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn list_query_requires_node_pair() {
        let query = ListEdgesQuery {
            node_kind: Some("process".into()),
            ..Default::default()
        };
        assert!(query.to_filter().is_err());
    }
}
