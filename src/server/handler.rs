use rmcp::serde_json::json;
use rmcp::{
    model::{
        CallToolResult, Content, GetPromptRequestParam, GetPromptResult, Implementation,
        ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, PaginatedRequestParam,
        ProtocolVersion, ReadResourceRequestParam, ReadResourceResult, ServerCapabilities,
        ServerInfo,
    },
    schemars::{self, JsonSchema},
    service::RequestContext,
    tool, Error as McpError, RoleServer, ServerHandler,
};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::domain::rag::RagService;
use crate::error::RagError;
use crate::initialization::ServiceState;

/// Handler for the MCP server logic.
#[derive(Clone)]
pub struct ScholarServerHandler {
    // The RAG service arrives from a background initialization task; tool
    // calls observe Initializing/Failed until then.
    pub service_state: Arc<Mutex<ServiceState>>,
    pub config: Arc<AppConfig>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct FetchArticlesArgs {
    #[schemars(description = "Research topic to search articles for")]
    query: String,
    #[schemars(description = "Optional maximum number of articles to fetch (defaults to one provider page)")]
    count: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SummarizeArgs {
    #[schemars(description = "Research topic to summarize")]
    query: String,
    #[schemars(description = "Optional number of stored passages to ground the summary on (default 5)")]
    limit: Option<usize>,
}

#[tool(tool_box)]
impl ScholarServerHandler {
    /// Creates a new handler whose service is not yet initialized.
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            service_state: Arc::new(Mutex::new(ServiceState::Initializing)),
            config,
        }
    }

    /// Clones the service Arc out of the state, or reports why it is not
    /// available. The lock is never held across an await.
    fn service(&self) -> Result<Arc<dyn RagService>, CallToolResult> {
        let state = self.service_state.lock().unwrap();
        match &*state {
            ServiceState::Ready(service) => Ok(service.clone()),
            ServiceState::Initializing => Err(CallToolResult::error(vec![Content::text(
                "The research service is still initializing. Please try again shortly.",
            )])),
            ServiceState::Failed(reason) => Err(CallToolResult::error(vec![Content::text(
                format!("The research service failed to initialize: {reason}"),
            )])),
        }
    }

    fn report_as_result<T: serde::Serialize>(report: &T) -> Result<CallToolResult, McpError> {
        match serde_json::to_string(report) {
            Ok(json_string) => Ok(CallToolResult::success(vec![Content::text(json_string)])),
            Err(e) => {
                log::error!("Failed to serialize tool response: {}", e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Failed to serialize response: {e}"
                ))]))
            }
        }
    }

    /// Fetches articles for a topic and stores their abstracts for later
    /// summarization. Returns the fetched articles and the stored count.
    #[tool(description = "Fetch scholarly articles for a topic and index their abstracts.")]
    async fn fetch_scholar_articles(
        &self,
        #[tool(aggr)] args: FetchArticlesArgs,
        ct: CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        // One provider page is the natural unit of fetching.
        let count = args.count.unwrap_or(self.config.source.page_size);
        log::info!(
            "Executing fetch_scholar_articles with query: '{}', count: {}",
            args.query,
            count
        );

        let service = match self.service() {
            Ok(service) => service,
            Err(unavailable) => return Ok(unavailable),
        };

        match service.ingest(&args.query, count, &ct).await {
            Ok(report) => Self::report_as_result(&report),
            Err(e) => {
                log::error!("Article ingestion failed: {}", e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Article ingestion failed: {e}"
                ))]))
            }
        }
    }

    /// Generates a grounded summary of previously indexed research on a topic.
    #[tool(description = "Summarize indexed research on a topic using retrieval-augmented generation.")]
    async fn summarize_research(
        &self,
        #[tool(aggr)] args: SummarizeArgs,
        ct: CancellationToken,
    ) -> Result<CallToolResult, McpError> {
        log::info!(
            "Executing summarize_research with query: '{}', limit: {:?}",
            args.query,
            args.limit
        );

        let service = match self.service() {
            Ok(service) => service,
            Err(unavailable) => return Ok(unavailable),
        };

        match service.summarize(&args.query, args.limit, &ct).await {
            Ok(report) => Self::report_as_result(&report),
            // A topic with nothing indexed is a valid empty outcome, not a
            // tool failure.
            Err(RagError::NoRelevantDocuments) => Self::report_as_result(&json!({
                "status": "no_relevant_documents",
                "sources_count": 0,
            })),
            Err(e) => {
                log::error!("Summarization failed: {}", e);
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Summarization failed: {e}"
                ))]))
            }
        }
    }

    /// Reports the lifecycle state of the RAG service.
    #[tool(description = "Report whether the research service is ready.")]
    async fn service_status(&self) -> Result<CallToolResult, McpError> {
        let state = self.service_state.lock().unwrap();
        let payload = match &*state {
            ServiceState::Failed(reason) => json!({
                "status": state.describe(),
                "reason": reason,
            }),
            _ => json!({ "status": state.describe() }),
        };
        drop(state);
        Self::report_as_result(&payload)
    }
}

#[tool(tool_box)]
impl ServerHandler for ScholarServerHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "This server fetches scholarly articles, indexes their abstracts, and produces retrieval-grounded research summaries."
                    .into(),
            ),
        }
    }

    async fn list_resources(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: vec![],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        ReadResourceRequestParam { uri }: ReadResourceRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        Err(McpError::resource_not_found(
            "Resource feature not implemented",
            Some(json!({ "uri": uri })),
        ))
    }

    async fn list_prompts(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        Ok(ListPromptsResult {
            next_cursor: None,
            prompts: vec![],
        })
    }

    async fn get_prompt(
        &self,
        GetPromptRequestParam { name, arguments: _ }: GetPromptRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        Err(McpError::invalid_params(
            format!("Prompt feature not implemented: {}", name),
            None,
        ))
    }

    async fn list_resource_templates(
        &self,
        _request: PaginatedRequestParam,
        _: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::article::Article;
    use crate::domain::rag::{IngestReport, SummaryReport};
    use crate::error::RagResult;
    use async_trait::async_trait;
    use rmcp::model::RawContent;
    use rmcp::serde_json;

    /// Canned RagService covering the tool surface. Honours the token the
    /// handler hands down, like the real pipeline does.
    #[derive(Default)]
    struct MockRagService {
        ingest_report: Option<IngestReport>,
        summary_report: Option<SummaryReport>,
        summarize_error: Option<fn() -> RagError>,
        ingest_calls: std::sync::Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl RagService for MockRagService {
        async fn ingest(
            &self,
            query: &str,
            count: usize,
            cancel: &CancellationToken,
        ) -> RagResult<IngestReport> {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            self.ingest_calls
                .lock()
                .unwrap()
                .push((query.to_string(), count));
            Ok(self.ingest_report.clone().expect("ingest not stubbed"))
        }

        async fn summarize(
            &self,
            _query: &str,
            _limit: Option<usize>,
            cancel: &CancellationToken,
        ) -> RagResult<SummaryReport> {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            if let Some(make_error) = self.summarize_error {
                return Err(make_error());
            }
            Ok(self.summary_report.clone().expect("summarize not stubbed"))
        }
    }

    fn handler_with(service: MockRagService) -> ScholarServerHandler {
        ScholarServerHandler {
            service_state: Arc::new(Mutex::new(ServiceState::Ready(Arc::new(service)))),
            config: Arc::new(AppConfig::default()),
        }
    }

    fn result_text(result: &CallToolResult) -> String {
        match &result.content[0].raw {
            RawContent::Text(text) => text.text.clone(),
            other => panic!("Expected text content, found {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_tool_reports_articles_and_stored_count() {
        let report = IngestReport {
            articles: vec![Article {
                title: "Attention is enough, mostly".to_string(),
                abstract_text: "We revisit attention.".to_string(),
                url: Some("https://example.org/attn".to_string()),
                authors: "A Researcher".to_string(),
                year: Some("2024".to_string()),
                publication: "Conf on Learning".to_string(),
            }],
            abstracts_stored: 1,
        };
        let handler = handler_with(MockRagService {
            ingest_report: Some(report.clone()),
            ..MockRagService::default()
        });

        let result = handler
            .fetch_scholar_articles(
                FetchArticlesArgs {
                    query: "attention".to_string(),
                    count: Some(1),
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(false));
        let parsed: IngestReport = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(parsed, report);
    }

    #[tokio::test]
    async fn summarize_tool_reports_the_summary() {
        let handler = handler_with(MockRagService {
            summary_report: Some(SummaryReport {
                summary: "Recent work converges on retrieval.".to_string(),
                sources_count: 3,
            }),
            ..MockRagService::default()
        });

        let result = handler
            .summarize_research(
                SummarizeArgs {
                    query: "retrieval".to_string(),
                    limit: None,
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(false));
        let parsed: SummaryReport = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(parsed.sources_count, 3);
    }

    #[tokio::test]
    async fn summarize_tool_treats_empty_retrieval_as_success() {
        let handler = handler_with(MockRagService {
            summarize_error: Some(|| RagError::NoRelevantDocuments),
            ..MockRagService::default()
        });

        let result = handler
            .summarize_research(
                SummarizeArgs {
                    query: "obscure topic".to_string(),
                    limit: None,
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(false));
        let payload: serde_json::Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(payload["status"], "no_relevant_documents");
        assert_eq!(payload["sources_count"], 0);
    }

    #[tokio::test]
    async fn summarize_tool_surfaces_pipeline_errors() {
        let handler = handler_with(MockRagService {
            summarize_error: Some(|| RagError::InvalidInput("query cannot be empty".to_string())),
            ..MockRagService::default()
        });

        let result = handler
            .summarize_research(
                SummarizeArgs {
                    query: "  ".to_string(),
                    limit: None,
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(true));
        assert!(result_text(&result).contains("invalid input"));
    }

    #[tokio::test]
    async fn tools_reject_calls_while_initializing() {
        let handler = ScholarServerHandler::new(Arc::new(AppConfig::default()));

        let result = handler
            .fetch_scholar_articles(
                FetchArticlesArgs {
                    query: "any".to_string(),
                    count: None,
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(true));
        assert!(result_text(&result).contains("still initializing"));
    }

    #[tokio::test]
    async fn status_tool_includes_the_failure_reason() {
        let handler = ScholarServerHandler {
            service_state: Arc::new(Mutex::new(ServiceState::Failed(
                "vector backend unreachable".to_string(),
            ))),
            config: Arc::new(AppConfig::default()),
        };

        let result = handler.service_status().await.expect("Tool call failed");
        let payload: serde_json::Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(payload["status"], "failed");
        assert_eq!(payload["reason"], "vector backend unreachable");
    }

    #[tokio::test]
    async fn fetch_default_count_is_one_provider_page() {
        let service = Arc::new(MockRagService {
            ingest_report: Some(IngestReport::empty()),
            ..MockRagService::default()
        });
        let mut config = AppConfig::default();
        config.source.page_size = 7;
        let handler = ScholarServerHandler {
            service_state: Arc::new(Mutex::new(ServiceState::Ready(service.clone()))),
            config: Arc::new(config),
        };

        handler
            .fetch_scholar_articles(
                FetchArticlesArgs {
                    query: "attention".to_string(),
                    count: None,
                },
                CancellationToken::new(),
            )
            .await
            .expect("Tool call failed");

        assert_eq!(
            service.ingest_calls.lock().unwrap()[0],
            ("attention".to_string(), 7)
        );
    }

    #[tokio::test]
    async fn fetch_tool_forwards_the_request_token_to_the_pipeline() {
        let service = Arc::new(MockRagService {
            ingest_report: Some(IngestReport::empty()),
            ..MockRagService::default()
        });
        let handler = ScholarServerHandler {
            service_state: Arc::new(Mutex::new(ServiceState::Ready(service.clone()))),
            config: Arc::new(AppConfig::default()),
        };

        let ct = CancellationToken::new();
        ct.cancel();
        let result = handler
            .fetch_scholar_articles(
                FetchArticlesArgs {
                    query: "attention".to_string(),
                    count: Some(1),
                },
                ct,
            )
            .await
            .expect("Tool call failed");

        assert_eq!(result.is_error, Some(true));
        assert!(result_text(&result).contains("cancelled"));
        assert!(service.ingest_calls.lock().unwrap().is_empty());
    }
}
