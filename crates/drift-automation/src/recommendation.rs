//! Relocation recommendations and where they come from.

use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;

use drift_control::{ControlResult, HttpControlPlane};
use drift_core::{GuestId, GuestKind, GuestRef, MigrationRequest, NodeName};

/// Lower-cased guest tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GuestTags(BTreeSet<String>);

impl GuestTags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tags.into_iter()
                .map(|t| t.as_ref().trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Anti-affinity groups: tags starting with `exclude_`.
    pub fn exclude_groups(&self) -> impl Iterator<Item = &str> {
        self.0
            .iter()
            .map(String::as_str)
            .filter(|t| t.starts_with(EXCLUDE_PREFIX))
    }
}

pub const EXCLUDE_PREFIX: &str = "exclude_";

/// Tags arrive as `"a;b"`, as a list, or as `{has_ignore, all_tags}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTags {
    Text(String),
    List(Vec<String>),
    Detailed {
        #[serde(default)]
        has_ignore: bool,
        #[serde(default)]
        exclude_groups: Vec<String>,
        #[serde(default)]
        all_tags: Vec<String>,
    },
}

impl<'de> Deserialize<'de> for GuestTags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawTags::deserialize(deserializer)? {
            RawTags::Text(text) => GuestTags::new(text.split(';')),
            RawTags::List(list) => GuestTags::new(list),
            RawTags::Detailed {
                has_ignore,
                exclude_groups,
                all_tags,
            } => {
                let mut tags = GuestTags::new(all_tags.iter().chain(&exclude_groups));
                if has_ignore {
                    tags.0.insert("ignore".to_string());
                }
                tags
            }
        })
    }
}

fn default_kind() -> GuestKind {
    GuestKind::Vm
}

fn parse_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GuestKind, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

/// One suggested relocation. The score is computed elsewhere and only
/// compared against the configured minimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub vmid: GuestId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_kind", deserialize_with = "parse_kind")]
    pub kind: GuestKind,
    pub source_node: NodeName,
    pub target_node: NodeName,
    #[serde(default)]
    pub reason: String,
    #[serde(rename = "confidence_score", default)]
    pub score: f64,
    #[serde(default)]
    pub tags: GuestTags,
}

impl Recommendation {
    pub fn guest(&self) -> GuestRef {
        GuestRef {
            id: self.vmid,
            kind: self.kind,
        }
    }

    pub fn to_request(&self) -> MigrationRequest {
        let mut request = MigrationRequest::new(self.guest(), &self.source_node, &self.target_node);
        request.name = self.name.clone();
        request.reason = Some(self.reason.clone()).filter(|r| !r.is_empty());
        request.score = Some(self.score);
        request
    }
}

pub type RecommendationFuture<'a> =
    Pin<Box<dyn Future<Output = ControlResult<Vec<Recommendation>>> + Send + 'a>>;

/// Supplier of relocation recommendations.
pub trait RecommendationSource: Send + Sync {
    fn recommendations<'a>(&'a self, maintenance_nodes: &'a [String]) -> RecommendationFuture<'a>;
}

#[derive(Deserialize)]
struct RecommendationsReply {
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

impl RecommendationSource for HttpControlPlane {
    fn recommendations<'a>(&'a self, maintenance_nodes: &'a [String]) -> RecommendationFuture<'a> {
        Box::pin(async move {
            let body = json!({ "maintenance_nodes": maintenance_nodes });
            let reply: RecommendationsReply = self.post_json("/api/recommendations", &body).await?;
            Ok(reply.recommendations)
        })
    }
}
