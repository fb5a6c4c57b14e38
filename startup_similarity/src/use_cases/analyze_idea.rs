use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::{
    domain::entities::{dataset_record::Payload, index_entry::SimilarityResult},
    use_cases::search_similar::SimilaritySearch,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub value: u8,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Profitability {
    pub roi_percentage: u16,
    pub timeframe_months: u8,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetAudience {
    pub segment: String,
    pub purchasing_power: String,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Competitor {
    pub name: String,
    pub landing_page: Option<String>,
    pub strength: String,
    pub weakness: String,
}

/// A dataset startup close to the analysed idea
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarStartup {
    pub label: String,
    /// Cosine similarity mapped from [-1, 1] to [0, 1]
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdeaAnalysis {
    pub summary: String,
    pub score: Score,
    pub profitability: Profitability,
    pub target: TargetAudience,
    pub competitors: Vec<Competitor>,
    pub positioning: String,
    pub category: Option<String>,
    /// `None` when similarity search was unavailable
    pub similar: Option<Vec<SimilarStartup>>,
}

/// Builds the analysis of a startup idea.
///
/// The analysis itself is a fixed mock; only the similar startups come from the vector
/// index. A failing search never fails the analysis, it only leaves `similar` empty.
pub struct IdeaAnalyzer {
    similarity_search: Arc<SimilaritySearch>,
    top_k: usize,
}

impl IdeaAnalyzer {
    pub fn new(similarity_search: Arc<SimilaritySearch>, top_k: usize) -> Self {
        Self {
            similarity_search,
            top_k,
        }
    }

    #[tracing::instrument(name = "Analysing startup idea", skip(self, idea))]
    pub async fn analyze(&self, idea: &str) -> IdeaAnalysis {
        self.analyze_with(idea, self.top_k).await
    }

    /// Same as `analyze`, with `top_k` similar startups instead of the configured count
    pub async fn analyze_with(&self, idea: &str, top_k: usize) -> IdeaAnalysis {
        let similar = match self.similarity_search.search(idea, top_k).await {
            Ok(results) => Some(results.iter().map(SimilarStartup::from).collect()),
            Err(error) => {
                warn!(
                    ?error,
                    "Similarity search failed, analysis returned without similar startups"
                );
                None
            }
        };

        IdeaAnalysis {
            similar,
            ..mocked_analysis(idea)
        }
    }
}

fn mocked_analysis(idea: &str) -> IdeaAnalysis {
    IdeaAnalysis {
        summary: format!("This idea '{}' aims to improve efficiency using AI.", idea),
        score: Score {
            value: 84,
            reason: "Large market, moderate competition, feasible for small teams.".into(),
        },
        profitability: Profitability {
            roi_percentage: 120,
            timeframe_months: 24,
            reason: "Recurring SaaS revenues with moderate CAC lead to break-even in ~18 months."
                .into(),
        },
        target: TargetAudience {
            segment: "SMEs managing delivery fleets".into(),
            purchasing_power: "medium-high".into(),
            justification: "Budgets for logistics software typically range from €6-12k/year."
                .into(),
        },
        competitors: vec![
            Competitor {
                name: "GreenRider".into(),
                landing_page: Some("https://greenrider.fr".into()),
                strength: "Eco brand visibility".into(),
                weakness: "Limited AI integration".into(),
            },
            Competitor {
                name: "EcoDash".into(),
                landing_page: Some("https://ecodash.com".into()),
                strength: "Speed and user base".into(),
                weakness: "High operational costs".into(),
            },
        ],
        positioning:
            "Targets SMEs needing route optimization, unlike competitors focusing on enterprise fleets."
                .into(),
        category: Some("mock".into()),
        similar: None,
    }
}

impl From<&SimilarityResult> for SimilarStartup {
    fn from(result: &SimilarityResult) -> Self {
        Self {
            label: label(result.name(), &result.payload),
            similarity: ((result.score + 1.0) / 2.0).clamp(0.0, 1.0),
        }
    }
}

/// `Acme (Software • France • $2.5B)`, leaving out the missing details
fn label(name: Option<&str>, payload: &Payload) -> String {
    let name = name.unwrap_or("Unknown startup");
    let mut details: Vec<String> = ["industry", "country"]
        .iter()
        .filter_map(|key| payload.get(*key).and_then(|value| value.as_text()))
        .map(str::to_string)
        .collect();

    let valuation = payload
        .get("valuation_b")
        .and_then(|value| value.as_number())
        .filter(|valuation| *valuation > 0.0);
    if let Some(valuation) = valuation {
        details.push(format!("${:.1}B", valuation));
    }

    if details.is_empty() {
        name.to_string()
    } else {
        format!("{} ({})", name, details.join(" • "))
    }
}
