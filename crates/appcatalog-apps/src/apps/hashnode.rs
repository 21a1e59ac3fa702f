//! Hashnode -- blog publishing over the Hashnode GraphQL API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::info;

use appcatalog_core::options::{optional_str, optional_u64, require_str};
use appcatalog_core::{
    ApiClient, AppCategory, AppError, Application, AuthRequirement, AuthScheme, CredentialCell,
    GraphQlClient, HealthStatus, HttpSettings, IMPORTANT_TAG, Integration, Result,
    ToolDefinition,
};

use super::{API_KEY_ALIASES, health_from, unknown_tool};

const ENDPOINT: &str = "https://gql.hashnode.com";

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

const PUBLISH_POST: &str = r#"
mutation PublishPost($input: PublishPostInput!) {
  publishPost(input: $input) { post { id slug url } }
}"#;

const CREATE_DRAFT: &str = r#"
mutation CreateDraft($input: CreateDraftInput!) {
  createDraft(input: $input) { draft { id slug title } }
}"#;

const PUBLISH_DRAFT: &str = r#"
mutation PublishDraft($input: PublishDraftInput!) {
  publishDraft(input: $input) { post { id slug url } }
}"#;

const UPDATE_POST: &str = r#"
mutation UpdatePost($input: UpdatePostInput!) {
  updatePost(input: $input) { post { id slug url } }
}"#;

const REMOVE_POST: &str = r#"
mutation RemovePost($input: RemovePostInput!) {
  removePost(input: $input) { post { id slug previousSlugs title subtitle } }
}"#;

const ADD_COMMENT: &str = r#"
mutation AddComment($input: AddCommentInput!) {
  addComment(input: $input) {
    comment { id content { markdown } author { id username } }
  }
}"#;

const REMOVE_COMMENT: &str = r#"
mutation RemoveComment($input: RemoveCommentInput!) {
  removeComment(input: $input) { comment { id } }
}"#;

const ME: &str = r#"
query Me {
  me {
    id username name tagline profilePicture location availableFor
    bio { markdown text }
    socialMediaLinks { website github twitter linkedin youtube bluesky }
    followersCount followingsCount dateJoined email role
  }
}"#;

const PUBLICATION: &str = r#"
query Publication($host: String, $id: ObjectId) {
  publication(host: $host, id: $id) {
    id title url isTeam
    posts(first: 5) { edges { node { id } } }
  }
}"#;

const LIST_POSTS: &str = r#"
query PublicationPosts($id: ObjectId!, $first: Int!, $after: String) {
  publication(id: $id) {
    posts(first: $first, after: $after) {
      edges { node { id title slug url } cursor }
      pageInfo { endCursor hasNextPage }
    }
  }
}"#;

const GET_POST: &str = r#"
query Post($id: ID, $slug: String, $hostname: String) {
  post(id: $id, slug: $slug, hostname: $hostname) {
    id slug previousSlugs title subtitle url
    author { id username name }
    comments(first: 5) { edges { node { id } } }
  }
}"#;

const USER: &str = r#"
query User($username: String!) {
  user(username: $username) {
    id username name tagline profilePicture followersCount followingsCount
  }
}"#;

pub struct HashnodeApp {
    endpoint: String,
    settings: HttpSettings,
    client: CredentialCell<GraphQlClient>,
}

impl HashnodeApp {
    pub fn new(integration: Option<Arc<dyn Integration>>) -> Self {
        Self {
            endpoint: ENDPOINT.to_string(),
            settings: HttpSettings::default(),
            client: CredentialCell::new("hashnode", integration),
        }
    }

    pub fn with_base_url(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_settings(mut self, settings: HttpSettings) -> Self {
        self.settings = settings;
        self
    }

    async fn client(&self) -> Result<&GraphQlClient> {
        self.client
            .get_or_resolve(|app, creds| {
                let token = creds.require(app, "API key", API_KEY_ALIASES)?;
                // Hashnode takes the raw token, without a `Bearer` prefix.
                let http = ApiClient::with_settings(app, &self.endpoint, &self.settings)?
                    .with_auth(AuthScheme::Header {
                        name: "Authorization".into(),
                        value: token,
                    });
                Ok(GraphQlClient::new(http))
            })
            .await
    }

    async fn tool_publish_post(&self, params: &Value) -> Result<Value> {
        let input = post_input(params, "publish_post")?;
        let data = self
            .client()
            .await?
            .mutate(PUBLISH_POST, json!({ "input": input }))
            .await?;
        let post = take(data, "/publishPost/post")?;
        info!(url = ?post.get("url"), "hashnode post published");
        Ok(post)
    }

    async fn tool_create_draft(&self, params: &Value) -> Result<Value> {
        let input = post_input(params, "create_draft")?;
        let data = self
            .client()
            .await?
            .mutate(CREATE_DRAFT, json!({ "input": input }))
            .await?;
        take(data, "/createDraft/draft")
    }

    async fn tool_publish_draft(&self, params: &Value) -> Result<Value> {
        let draft = require_str(params, "draft_id", "publish_draft")?;
        let data = self
            .client()
            .await?
            .mutate(PUBLISH_DRAFT, json!({ "input": { "draftId": draft } }))
            .await?;
        take(data, "/publishDraft/post")
    }

    async fn tool_modify_post(&self, params: &Value) -> Result<Value> {
        let id = require_str(params, "post_id", "modify_post")?;
        let mut input = optional_post_fields(params);
        input.insert("id".into(), json!(id));
        if input.len() == 1 {
            return Err(AppError::invalid_params(
                "modify_post",
                "nothing to change: pass at least one of title, content, tags, slug, subtitle, cover_image",
            ));
        }
        let data = self
            .client()
            .await?
            .mutate(UPDATE_POST, json!({ "input": input }))
            .await?;
        take(data, "/updatePost/post")
    }

    async fn tool_delete_post(&self, params: &Value) -> Result<Value> {
        let id = require_str(params, "post_id", "delete_post")?;
        let data = self
            .client()
            .await?
            .mutate(REMOVE_POST, json!({ "input": { "id": id } }))
            .await?;
        take(data, "/removePost/post")
    }

    async fn tool_add_comment(&self, params: &Value) -> Result<Value> {
        let post = require_str(params, "post_id", "add_comment")?;
        let content = require_str(params, "content", "add_comment")?;
        let data = self
            .client()
            .await?
            .mutate(
                ADD_COMMENT,
                json!({ "input": { "postId": post, "contentMarkdown": content } }),
            )
            .await?;
        take(data, "/addComment/comment")
    }

    async fn tool_delete_comment(&self, params: &Value) -> Result<Value> {
        let id = require_str(params, "comment_id", "delete_comment")?;
        let data = self
            .client()
            .await?
            .mutate(REMOVE_COMMENT, json!({ "input": { "id": id } }))
            .await?;
        take(data, "/removeComment/comment")
    }

    async fn tool_get_me(&self) -> Result<Value> {
        let data = self.client().await?.query(ME, json!({})).await?;
        take(data, "/me")
    }

    async fn tool_get_publication(&self, params: &Value) -> Result<Value> {
        let variables = match (
            optional_str(params, "host"),
            optional_str(params, "publication_id"),
        ) {
            (Some(host), _) => json!({ "host": host }),
            (None, Some(id)) => json!({ "id": id }),
            (None, None) => {
                return Err(AppError::invalid_params(
                    "get_publication",
                    "either `host` or `publication_id` must be provided",
                ));
            }
        };
        let data = self.client().await?.query(PUBLICATION, variables).await?;
        take(data, "/publication")
    }

    async fn tool_list_posts(&self, params: &Value) -> Result<Value> {
        let id = require_str(params, "publication_id", "list_posts")?;
        let mut variables = json!({
            "id": id,
            "first": optional_u64(params, "first").unwrap_or(10),
        });
        if let Some(after) = optional_str(params, "after") {
            variables["after"] = json!(after);
        }
        let data = self.client().await?.query(LIST_POSTS, variables).await?;
        take(data, "/publication/posts")
    }

    async fn tool_get_post(&self, params: &Value) -> Result<Value> {
        let variables = match (
            optional_str(params, "post_id"),
            optional_str(params, "slug"),
            optional_str(params, "hostname"),
        ) {
            (Some(id), _, _) => json!({ "id": id }),
            (None, Some(slug), Some(hostname)) => json!({ "slug": slug, "hostname": hostname }),
            _ => {
                return Err(AppError::invalid_params(
                    "get_post",
                    "either `post_id` or both `slug` and `hostname` must be provided",
                ));
            }
        };
        let data = self.client().await?.query(GET_POST, variables).await?;
        take(data, "/post")
    }

    async fn tool_get_user(&self, params: &Value) -> Result<Value> {
        let username = require_str(params, "username", "get_user")?;
        let data = self
            .client()
            .await?
            .query(USER, json!({ "username": username }))
            .await?;
        take(data, "/user")
    }
}

/// Build a `PublishPostInput` / `CreateDraftInput`.
fn post_input(params: &Value, tool: &str) -> Result<Map<String, Value>> {
    let publication = require_str(params, "publication_id", tool)?;
    let title = require_str(params, "title", tool)?;
    let content = require_str(params, "content", tool)?;
    let mut input = optional_post_fields(params);
    input.insert("publicationId".into(), json!(publication));
    input.insert("title".into(), json!(title));
    input.insert("contentMarkdown".into(), json!(content));
    Ok(input)
}

/// The optional post fields shared by create and update.
fn optional_post_fields(params: &Value) -> Map<String, Value> {
    let mut input = Map::new();
    if let Some(title) = optional_str(params, "title") {
        input.insert("title".into(), json!(title));
    }
    if let Some(content) = optional_str(params, "content") {
        input.insert("contentMarkdown".into(), json!(content));
    }
    if let Some(tags) = params.get("tags").and_then(|t| t.as_array())
        && !tags.is_empty()
    {
        let tags: Vec<Value> = tags
            .iter()
            .filter_map(|t| t.as_str())
            .map(|name| json!({ "name": name, "slug": tag_slug(name) }))
            .collect();
        input.insert("tags".into(), Value::Array(tags));
    }
    if let Some(slug) = optional_str(params, "slug") {
        input.insert("slug".into(), json!(slug));
    }
    if let Some(subtitle) = optional_str(params, "subtitle") {
        input.insert("subtitle".into(), json!(subtitle));
    }
    if let Some(cover) = optional_str(params, "cover_image") {
        input.insert("coverImageOptions".into(), json!({ "coverImageURL": cover }));
    }
    input
}

/// `"Rust Lang"` -> `"rust-lang"`.
fn tag_slug(name: &str) -> String {
    name.replace(' ', "-").to_lowercase()
}

/// Extract the object at `pointer`, failing when it is absent or null.
fn take(mut data: Value, pointer: &str) -> Result<Value> {
    match data.pointer_mut(pointer).map(Value::take) {
        Some(Value::Null) | None => Err(AppError::NotFound(format!(
            "hashnode response has no `{}`",
            pointer.trim_start_matches('/').replace('/', ".")
        ))),
        Some(value) => Ok(value),
    }
}

fn post_properties() -> Value {
    json!({
        "publication_id": { "type": "string" },
        "title": { "type": "string" },
        "content": { "type": "string", "description": "Markdown body" },
        "tags": { "type": "array", "items": { "type": "string" } },
        "slug": { "type": "string" },
        "subtitle": { "type": "string" },
        "cover_image": { "type": "string", "description": "Cover image URL" }
    })
}

fn schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

#[async_trait]
impl Application for HashnodeApp {
    fn name(&self) -> &str {
        "hashnode"
    }

    fn category(&self) -> AppCategory {
        AppCategory::Productivity
    }

    fn tools(&self) -> Vec<ToolDefinition> {
        let post_required = ["publication_id", "title", "content"];
        let mut modify = post_properties();
        if let Some(props) = modify.as_object_mut() {
            props.remove("publication_id");
            props.insert("post_id".into(), json!({ "type": "string" }));
        }
        vec![
            ToolDefinition::new(
                "publish_post",
                "Publish a new post to a publication and return its URL",
                schema(post_properties(), &post_required),
                &["post", "publish", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "create_draft",
                "Save a new post as a draft without publishing it",
                schema(post_properties(), &post_required),
                &["draft", "create", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "publish_draft",
                "Publish an existing draft",
                schema(json!({ "draft_id": { "type": "string" } }), &["draft_id"]),
                &["draft", "publish", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_me",
                "Fetch the profile of the authenticated user",
                schema(json!({}), &[]),
                &["user", "profile", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_publication",
                "Fetch a publication by host name or id",
                schema(
                    json!({
                        "host": { "type": "string", "description": "e.g. `blog.example.com`" },
                        "publication_id": { "type": "string" }
                    }),
                    &[],
                ),
                &["publication", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "list_posts",
                "List the posts of a publication, paginated by cursor",
                schema(
                    json!({
                        "publication_id": { "type": "string" },
                        "first": { "type": "integer", "default": 10 },
                        "after": { "type": "string", "description": "Cursor from a previous page" }
                    }),
                    &["publication_id"],
                ),
                &["post", "list", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "get_post",
                "Fetch a post by id, or by slug and host name",
                schema(
                    json!({
                        "post_id": { "type": "string" },
                        "slug": { "type": "string" },
                        "hostname": { "type": "string" }
                    }),
                    &[],
                ),
                &["post", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "modify_post",
                "Change the title, content, tags, slug, subtitle or cover of a post",
                schema(modify, &["post_id"]),
                &["post", "update"],
            ),
            ToolDefinition::new(
                "delete_post",
                "Delete a post",
                schema(json!({ "post_id": { "type": "string" } }), &["post_id"]),
                &["post", "delete", IMPORTANT_TAG],
            ),
            ToolDefinition::new(
                "add_comment",
                "Comment on a post",
                schema(
                    json!({
                        "post_id": { "type": "string" },
                        "content": { "type": "string", "description": "Markdown" }
                    }),
                    &["post_id", "content"],
                ),
                &["comment", "create"],
            ),
            ToolDefinition::new(
                "delete_comment",
                "Delete a comment",
                schema(json!({ "comment_id": { "type": "string" } }), &["comment_id"]),
                &["comment", "delete"],
            ),
            ToolDefinition::new(
                "get_user",
                "Fetch a public user profile by username",
                schema(json!({ "username": { "type": "string" } }), &["username"]),
                &["user", IMPORTANT_TAG],
            ),
        ]
    }

    async fn execute_tool(&self, name: &str, params: Value) -> Result<Value> {
        match name {
            "publish_post" => self.tool_publish_post(&params).await,
            "create_draft" => self.tool_create_draft(&params).await,
            "publish_draft" => self.tool_publish_draft(&params).await,
            "get_me" => self.tool_get_me().await,
            "get_publication" => self.tool_get_publication(&params).await,
            "list_posts" => self.tool_list_posts(&params).await,
            "get_post" => self.tool_get_post(&params).await,
            "modify_post" => self.tool_modify_post(&params).await,
            "delete_post" => self.tool_delete_post(&params).await,
            "add_comment" => self.tool_add_comment(&params).await,
            "delete_comment" => self.tool_delete_comment(&params).await,
            "get_user" => self.tool_get_user(&params).await,
            _ => Err(unknown_tool(self.name(), name)),
        }
    }

    fn required_auth(&self) -> Option<AuthRequirement> {
        Some(AuthRequirement::new("hashnode", &["api_key"]))
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        health_from(self.client().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appcatalog_core::StaticIntegration;
    use httpmock::prelude::*;

    fn app(server: &MockServer) -> HashnodeApp {
        HashnodeApp::new(Some(StaticIntegration::shared("hashnode", &[("api_key", "hn-tok")])))
            .with_base_url(&server.base_url())
    }

    #[tokio::test]
    async fn publish_post_builds_input_and_returns_post() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .header("authorization", "hn-tok")
                    .json_body_partial(
                        r##"{"variables": {"input": {
                            "publicationId": "pub1",
                            "title": "Hello",
                            "contentMarkdown": "# Hi",
                            "tags": [{"name": "Rust Lang", "slug": "rust-lang"}],
                            "coverImageOptions": {"coverImageURL": "https://img"}
                        }}}"##,
                    );
                then.status(200).json_body(json!({
                    "data": {"publishPost": {"post": {"id": "p1", "slug": "hello", "url": "https://b/hello"}}}
                }));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "publish_post",
                json!({
                    "publication_id": "pub1",
                    "title": "Hello",
                    "content": "# Hi",
                    "tags": ["Rust Lang"],
                    "cover_image": "https://img"
                }),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(out["url"], "https://b/hello");
    }

    #[tokio::test]
    async fn graphql_errors_surface() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({
                    "data": null,
                    "errors": [{"message": "User not found"}]
                }));
            })
            .await;

        let err = app(&server)
            .execute_tool("get_user", json!({"username": "ghost"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GraphQl(ref m) if m == "User not found"));
    }

    #[tokio::test]
    async fn get_publication_prefers_host() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/")
                    .json_body_partial(r#"{"variables": {"host": "blog.example.com"}}"#);
                then.status(200)
                    .json_body(json!({"data": {"publication": {"id": "pub1", "title": "B"}}}));
            })
            .await;

        let out = app(&server)
            .execute_tool(
                "get_publication",
                json!({"host": "blog.example.com", "publication_id": "ignored"}),
            )
            .await
            .unwrap();
        mock.assert_async().await;
        assert_eq!(out["id"], "pub1");
    }

    #[tokio::test]
    async fn lookup_arguments_are_validated() {
        let server = MockServer::start_async().await;
        let app = app(&server);
        let err = app
            .execute_tool("get_publication", json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("`host` or `publication_id`"));

        let err = app
            .execute_tool("get_post", json!({"slug": "only-slug"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn null_result_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({"data": {"post": null}}));
            })
            .await;

        let err = app(&server)
            .execute_tool("get_post", json!({"post_id": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn tag_slugs() {
        assert_eq!(tag_slug("Web Dev"), "web-dev");
    }
}
