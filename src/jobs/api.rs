//! Simple marketplace API jobs: one request (two for comment creation),
//! raw JSON result passed through to the plugin.

use std::path::Path;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{Completion, JobExecutor};
use crate::remote::{PoolClass, download_to_file};
use crate::tasks::{
    ApiKey, AssetRequest, ClientId, CreateCommentRequest, FeedbackCommentRequest,
    GravatarRequest, MarkCommentPrivateRequest, MarkNotificationReadRequest, MinimalRequest,
    SendRatingRequest, TaskId, TaskPayload, TaskResult,
};

impl JobExecutor {
    /// `categories_update`
    pub fn fetch_categories(&self, req: MinimalRequest) -> TaskId {
        let key = req.api_key.clone();
        self.submit(req.app_id, TaskPayload::Categories(req), move |ctx, _| async move {
            let url = ctx.marketplace.url("/api/v1/categories");
            let body: Value = ctx
                .marketplace
                .get_json(&url, &key, "Fetching categories")
                .await?;
            let mut results = body.get("results").cloned().unwrap_or(Value::Array(vec![]));
            fill_cumulative_counts(&mut results);
            Ok(Completion::new("Categories updated", TaskResult::json(results)))
        })
    }

    /// `disclaimer`
    pub fn fetch_disclaimer(&self, req: MinimalRequest) -> TaskId {
        let key = req.api_key.clone();
        self.submit(req.app_id, TaskPayload::Disclaimer(req), move |ctx, _| async move {
            let url = ctx.marketplace.url("/api/v1/disclaimer/active/");
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching disclaimer")
                .await?;
            Ok(Completion::new("Disclaimer fetched", TaskResult::json(body)))
        })
    }

    /// `notifications`
    pub fn fetch_notifications(&self, req: MinimalRequest) -> TaskId {
        let key = req.api_key.clone();
        self.submit(req.app_id, TaskPayload::Notifications(req), move |ctx, _| async move {
            let url = ctx.marketplace.url("/api/v1/notifications/unread/");
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching notifications")
                .await?;
            Ok(Completion::new("Notifications fetched", TaskResult::json(body)))
        })
    }

    /// `notifications/mark_notification_read`
    pub fn mark_notification_read(&self, req: MarkNotificationReadRequest) -> TaskId {
        let key = req.api_key.clone();
        let id = req.notification;
        self.submit(
            req.app_id,
            TaskPayload::MarkNotificationRead(req),
            move |ctx, _| async move {
                let url = ctx
                    .marketplace
                    .url(&format!("/api/v1/notifications/mark-as-read/{id}/"));
                let body = ctx
                    .marketplace
                    .get_json(&url, &key, "Marking notification read")
                    .await?;
                Ok(Completion::new("notification marked as read", TaskResult::json(body)))
            },
        )
    }

    /// `profiles/get_user_profile`
    pub fn fetch_user_profile(&self, req: MinimalRequest) -> TaskId {
        let key = req.api_key.clone();
        self.submit(req.app_id, TaskPayload::UserProfile(req), move |ctx, _| async move {
            let url = ctx.marketplace.url("/api/v1/me/");
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching user profile")
                .await?;
            Ok(Completion::new("data successfully fetched", TaskResult::json(body)))
        })
    }

    /// `profiles/fetch_gravatar_image`: prefer the server's avatar path,
    /// fall back to Gravatar by hash. Cached per user id.
    pub fn fetch_gravatar(&self, req: GravatarRequest, gravatar_dir: &Path) -> TaskId {
        let target = gravatar_dir.join(format!("{}.jpg", req.id));
        let (avatar, hash) = (req.avatar128.clone(), req.gravatar_hash.clone());
        self.submit(req.app_id, TaskPayload::GravatarImage(req), move |ctx, _| async move {
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                return Ok(Completion::new("Found on disk", TaskResult::Gravatar(target)));
            }
            let url = if avatar.is_empty() {
                format!("https://www.gravatar.com/avatar/{hash}?d=404")
            } else {
                ctx.marketplace.url(&avatar)
            };
            let builder = ctx.marketplace.request(
                PoolClass::SmallThumbs,
                Method::GET,
                &url,
                &ApiKey::default(),
            );
            let response = ctx
                .marketplace
                .execute(builder, &url, StatusCode::OK, "Downloading avatar")
                .await?;
            download_to_file(response, &url, &target, |_, _| {}).await?;
            Ok(Completion::new("Downloaded", TaskResult::Gravatar(target)))
        })
    }

    /// `ratings/get_rating`
    pub fn fetch_rating(&self, req: AssetRequest) -> TaskId {
        let key = req.api_key.clone();
        let asset_id = req.asset_id.clone();
        self.submit(req.app_id, TaskPayload::GetRating(req), move |ctx, _| async move {
            let url = ctx
                .marketplace
                .url(&format!("/api/v1/assets/{asset_id}/rating/"));
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching rating")
                .await?;
            Ok(Completion::new("Rating data obtained", TaskResult::json(body)))
        })
    }

    /// `ratings/send_rating`
    pub fn send_rating(&self, req: SendRatingRequest) -> TaskId {
        let key = req.api_key.clone();
        let (asset_id, rating_type, value) =
            (req.asset_id.clone(), req.rating_type.clone(), req.rating_value);
        self.submit(req.app_id, TaskPayload::SendRating(req), move |ctx, _| async move {
            let url = ctx
                .marketplace
                .url(&format!("/api/v1/assets/{asset_id}/rating/{rating_type}/"));
            let body: Value = ctx
                .marketplace
                .send_json(
                    Method::PUT,
                    &url,
                    &key,
                    &json!({ "score": value }),
                    StatusCode::OK,
                    "Rating asset",
                )
                .await?;
            Ok(Completion::new(
                format!("Rated {rating_type}={value} successfully"),
                TaskResult::json(body),
            ))
        })
    }

    /// `ratings/get_bookmarks`
    pub fn fetch_bookmarks(&self, req: MinimalRequest) -> TaskId {
        let key = req.api_key.clone();
        self.submit(req.app_id, TaskPayload::GetBookmarks(req), move |ctx, _| async move {
            let url = ctx
                .marketplace
                .url("/api/v1/search/?query=bookmarks_rating:1");
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching bookmarks")
                .await?;
            Ok(Completion::new("Bookmarks data obtained", TaskResult::json(body)))
        })
    }

    /// `comments/get_comments`
    pub fn fetch_comments(&self, req: AssetRequest) -> TaskId {
        let key = req.api_key.clone();
        let asset_id = req.asset_id.clone();
        self.submit(req.app_id, TaskPayload::GetComments(req), move |ctx, _| async move {
            let url = ctx
                .marketplace
                .url(&format!("/api/v1/comments/assets-uuidasset/{asset_id}/"));
            let body = ctx
                .marketplace
                .get_json(&url, &key, "Fetching comments")
                .await?;
            Ok(Completion::new("comments downloaded", TaskResult::json(body)))
        })
    }

    /// `comments/create_comment`: read the form token, post the comment,
    /// then refresh the asset's comments.
    pub fn create_comment(&self, req: CreateCommentRequest) -> TaskId {
        let refresh = self.comments_refresh(req.app_id, &req.api_key, &req.asset_id);
        let form_req = req.clone();
        self.submit(req.app_id, TaskPayload::CreateComment(req), move |ctx, _| async move {
            let req = form_req;
            let form_url = ctx
                .marketplace
                .url(&format!("/api/v1/comments/asset-comment/{}/", req.asset_id));
            let form: CommentFormResponse = ctx
                .marketplace
                .get_json(&form_url, &req.api_key, "Fetching comment form")
                .await?;

            let post = CommentPost {
                name: "",
                email: "",
                url: "",
                followup: req.reply_to_id > 0,
                reply_to: req.reply_to_id,
                honeypot: "",
                content_type: "assets.uuidasset",
                object_pk: &req.asset_id,
                timestamp: &form.form.timestamp,
                security_hash: &form.form.security_hash,
                comment: &req.comment_text,
            };
            let url = ctx.marketplace.url("/api/v1/comments/comment/");
            let body: Value = ctx
                .marketplace
                .send_json(
                    Method::POST,
                    &url,
                    &req.api_key,
                    &post,
                    StatusCode::CREATED,
                    "Creating comment",
                )
                .await?;
            refresh.run();
            Ok(Completion::new("Comment created", TaskResult::json(body)))
        })
    }

    /// `comments/feedback_comment`
    pub fn feedback_comment(&self, req: FeedbackCommentRequest) -> TaskId {
        let refresh = self.comments_refresh(req.app_id, &req.api_key, &req.asset_id);
        let key = req.api_key.clone();
        let body = json!({ "comment": req.comment_id, "flag": req.flag });
        self.submit(
            req.app_id,
            TaskPayload::FeedbackComment(req),
            move |ctx, _| async move {
                let url = ctx.marketplace.url("/api/v1/comments/feedback/");
                let reply: Value = ctx
                    .marketplace
                    .send_json(
                        Method::POST,
                        &url,
                        &key,
                        &body,
                        StatusCode::CREATED,
                        "Sending comment feedback",
                    )
                    .await?;
                refresh.run();
                Ok(Completion::new("flag uploaded", TaskResult::json(reply)))
            },
        )
    }

    /// `comments/mark_comment_private`
    pub fn mark_comment_private(&self, req: MarkCommentPrivateRequest) -> TaskId {
        let refresh = self.comments_refresh(req.app_id, &req.api_key, &req.asset_id);
        let key = req.api_key.clone();
        let (comment_id, is_private) = (req.comment_id, req.is_private);
        self.submit(
            req.app_id,
            TaskPayload::MarkCommentPrivate(req),
            move |ctx, _| async move {
                let url = ctx
                    .marketplace
                    .url(&format!("/api/v1/comments/is_private/{comment_id}/"));
                let reply: Value = ctx
                    .marketplace
                    .send_json(
                        Method::POST,
                        &url,
                        &key,
                        &json!({ "is_private": is_private }),
                        StatusCode::OK,
                        "Updating comment visibility",
                    )
                    .await?;
                refresh.run();
                Ok(Completion::new("comment visibility updated", TaskResult::json(reply)))
            },
        )
    }

    fn comments_refresh(&self, app_id: ClientId, api_key: &ApiKey, asset_id: &str) -> CommentsRefresh {
        CommentsRefresh {
            executor: self.clone(),
            request: AssetRequest {
                app_id,
                api_key: api_key.clone(),
                asset_id: asset_id.to_string(),
            },
        }
    }
}

/// Deferred `comments/get_comments` submission after a comment mutation.
struct CommentsRefresh {
    executor: JobExecutor,
    request: AssetRequest,
}

impl CommentsRefresh {
    fn run(self) {
        self.executor.fetch_comments(self.request);
    }
}

#[derive(Debug, Deserialize)]
struct CommentFormResponse {
    form: CommentForm,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentForm {
    timestamp: String,
    security_hash: String,
}

#[derive(Debug, Serialize)]
struct CommentPost<'a> {
    name: &'a str,
    email: &'a str,
    url: &'a str,
    followup: bool,
    reply_to: i64,
    honeypot: &'a str,
    content_type: &'a str,
    object_pk: &'a str,
    timestamp: &'a str,
    security_hash: &'a str,
    comment: &'a str,
}

/// Fill in `assetCountCumulative` where the server left it out, as the
/// category's own count plus its children's cumulative counts.
fn fill_cumulative_counts(categories: &mut Value) -> u64 {
    let Some(list) = categories.as_array_mut() else {
        return 0;
    };
    let mut total = 0;
    for category in list {
        let children = category
            .get_mut("children")
            .map(fill_cumulative_counts)
            .unwrap_or(0);
        let Some(obj) = category.as_object_mut() else {
            continue;
        };
        let cumulative = match obj.get("assetCountCumulative").and_then(Value::as_u64) {
            Some(count) => count,
            None => {
                let own = obj.get("assetCount").and_then(Value::as_u64).unwrap_or(0);
                let count = own + children;
                obj.insert("assetCountCumulative".to_string(), json!(count));
                count
            }
        };
        total += cumulative;
    }
    total
}

/// Submit the jobs a client gets on first contact.
pub fn submit_first_contact(executor: &JobExecutor, app_id: ClientId, api_key: &ApiKey) {
    let req = MinimalRequest {
        app_id,
        api_key: api_key.clone(),
    };
    executor.fetch_disclaimer(req.clone());
    executor.fetch_categories(req.clone());
    if api_key.is_present() {
        executor.fetch_notifications(req);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::testing::{executor, wait_for, wait_terminal};
    use crate::tasks::{TaskKind, TaskStatus};
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method as HttpMethod, StatusCode as HttpStatus, Uri, header};
    use axum::response::{IntoResponse, Response};

    /// One request as the marketplace saw it.
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        auth: Option<String>,
        body: Value,
    }

    #[derive(Default)]
    struct Market {
        seen: Mutex<Vec<Seen>>,
        reject_comments: bool,
    }

    impl Market {
        fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }

        fn paths(&self) -> Vec<String> {
            self.seen().into_iter().map(|s| format!("{} {}", s.method, s.path)).collect()
        }
    }

    async fn answer(
        State(m): State<Arc<Market>>,
        method: HttpMethod,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let path = uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_default();
        m.seen.lock().unwrap().push(Seen {
            method: method.to_string(),
            path: path.clone(),
            auth: headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });

        let (status, reply) = match (method.as_str(), path.as_str()) {
            ("GET", "/api/v1/categories") => (
                HttpStatus::OK,
                json!({"results": [{"slug": "model", "assetCount": 2, "children": []}]}),
            ),
            ("GET", "/api/v1/notifications/mark-as-read/3/") => (HttpStatus::OK, json!({})),
            ("PUT", "/api/v1/assets/a1/rating/quality/") => {
                (HttpStatus::OK, json!({"score": 4.0}))
            }
            ("GET", "/api/v1/comments/asset-comment/a1/") => (
                HttpStatus::OK,
                json!({"form": {"timestamp": "1700", "securityHash": "h4sh"}}),
            ),
            ("POST", "/api/v1/comments/comment/") if m.reject_comments => {
                (HttpStatus::BAD_REQUEST, json!({"detail": "spam"}))
            }
            ("POST", "/api/v1/comments/comment/") => (HttpStatus::CREATED, json!({"id": 5})),
            ("POST", "/api/v1/comments/feedback/") => (HttpStatus::CREATED, json!({})),
            ("POST", "/api/v1/comments/is_private/9/") => (HttpStatus::OK, json!({})),
            ("GET", "/api/v1/comments/assets-uuidasset/a1/") => {
                (HttpStatus::OK, json!({"results": []}))
            }
            _ => (HttpStatus::NOT_FOUND, json!({})),
        };
        (status, axum::Json(reply)).into_response()
    }

    async fn spawn_market(market: Arc<Market>) -> String {
        let app = Router::new().fallback(answer).with_state(market);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    fn key() -> ApiKey {
        ApiKey::new("key-1")
    }

    fn comment(text: &str) -> CreateCommentRequest {
        CreateCommentRequest {
            app_id: ClientId(6),
            api_key: key(),
            asset_id: "a1".into(),
            comment_text: text.into(),
            reply_to_id: 0,
        }
    }

    async fn refreshed_comments(market: &Market, registry: &crate::tasks::TaskRegistry) {
        let refresh = wait_for(registry, ClientId(6), |t| {
            t.kind == TaskKind::GetComments && t.is_terminal()
        })
        .await;
        assert_eq!(refresh.status, TaskStatus::Finished);
        assert!(
            market
                .paths()
                .contains(&"GET /api/v1/comments/assets-uuidasset/a1/".to_string())
        );
    }

    #[tokio::test]
    async fn create_comment_reads_form_then_posts_and_refreshes() {
        let market = Arc::new(Market::default());
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.create_comment(comment("Nice chair"));
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(task.result, TaskResult::json(json!({"id": 5})));

        let seen = market.seen();
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].path, "/api/v1/comments/asset-comment/a1/");
        assert_eq!(seen[0].auth.as_deref(), Some("Bearer key-1"));
        assert_eq!(seen[1].method, "POST");
        assert_eq!(seen[1].path, "/api/v1/comments/comment/");
        let post = &seen[1].body;
        assert_eq!(post["timestamp"], "1700");
        assert_eq!(post["security_hash"], "h4sh");
        assert_eq!(post["object_pk"], "a1");
        assert_eq!(post["content_type"], "assets.uuidasset");
        assert_eq!(post["comment"], "Nice chair");
        assert_eq!(post["followup"], false);

        refreshed_comments(&market, &registry).await;
    }

    #[tokio::test]
    async fn rejected_comment_fails_without_refresh() {
        let market = Arc::new(Market {
            reject_comments: true,
            ..Default::default()
        });
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.create_comment(comment("buy now"));
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, "Creating comment failed (400)");

        let tasks = registry.tasks(ClientId(6)).await;
        assert!(tasks.iter().all(|t| t.kind != TaskKind::GetComments));
    }

    #[tokio::test]
    async fn comment_feedback_and_visibility_refresh_comments() {
        let market = Arc::new(Market::default());
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.feedback_comment(FeedbackCommentRequest {
            app_id: ClientId(6),
            api_key: key(),
            asset_id: "a1".into(),
            comment_id: 9,
            flag: "like".into(),
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        refreshed_comments(&market, &registry).await;

        let id = executor.mark_comment_private(MarkCommentPrivateRequest {
            app_id: ClientId(6),
            api_key: key(),
            asset_id: "a1".into(),
            comment_id: 9,
            is_private: true,
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);

        let seen = market.seen();
        let feedback = seen
            .iter()
            .find(|s| s.path == "/api/v1/comments/feedback/")
            .unwrap();
        assert_eq!(feedback.method, "POST");
        assert_eq!(feedback.body, json!({"comment": 9, "flag": "like"}));
        let private = seen
            .iter()
            .find(|s| s.path == "/api/v1/comments/is_private/9/")
            .unwrap();
        assert_eq!(private.method, "POST");
        assert_eq!(private.body, json!({"is_private": true}));
    }

    #[tokio::test]
    async fn send_rating_puts_score() {
        let market = Arc::new(Market::default());
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.send_rating(SendRatingRequest {
            app_id: ClientId(6),
            api_key: key(),
            asset_id: "a1".into(),
            rating_type: "quality".into(),
            rating_value: 4.0,
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(task.message, "Rated quality=4 successfully");

        let seen = market.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].path, "/api/v1/assets/a1/rating/quality/");
        assert_eq!(seen[0].body, json!({"score": 4.0}));
    }

    #[tokio::test]
    async fn categories_and_notification_read_hit_their_endpoints() {
        let market = Arc::new(Market::default());
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.fetch_categories(MinimalRequest {
            app_id: ClientId(6),
            api_key: key(),
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);
        assert_eq!(task.message, "Categories updated");
        assert_eq!(
            task.result,
            TaskResult::json(json!([
                {"slug": "model", "assetCount": 2, "assetCountCumulative": 2, "children": []}
            ]))
        );

        let id = executor.mark_notification_read(MarkNotificationReadRequest {
            app_id: ClientId(6),
            api_key: key(),
            notification: 3,
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Finished, "{}", task.detailed_message);

        assert_eq!(
            market.paths(),
            vec![
                "GET /api/v1/categories".to_string(),
                "GET /api/v1/notifications/mark-as-read/3/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_with_status() {
        let market = Arc::new(Market::default());
        let base = spawn_market(market.clone()).await;
        let (executor, registry) = executor(&base);

        let id = executor.fetch_rating(AssetRequest {
            app_id: ClientId(6),
            api_key: ApiKey::default(),
            asset_id: "a1".into(),
        });
        let task = wait_terminal(&registry, ClientId(6), &id).await;
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.message, "Fetching rating failed (404)");
        assert_eq!(market.seen()[0].auth, None);
    }

    #[test]
    fn cumulative_counts_are_filled_from_children() {
        let mut categories = json!([
            {
                "slug": "model",
                "assetCount": 2,
                "children": [
                    {"slug": "chair", "assetCount": 3, "children": []},
                    {"slug": "table", "assetCount": 4, "assetCountCumulative": 10, "children": []}
                ]
            },
            {"slug": "hdr", "assetCount": 1, "assetCountCumulative": 7}
        ]);
        let total = fill_cumulative_counts(&mut categories);
        assert_eq!(categories[0]["assetCountCumulative"], 15);
        assert_eq!(categories[0]["children"][0]["assetCountCumulative"], 3);
        assert_eq!(categories[0]["children"][1]["assetCountCumulative"], 10);
        assert_eq!(categories[1]["assetCountCumulative"], 7);
        assert_eq!(total, 22);
    }

    #[test]
    fn comment_post_matches_form_fields() {
        let post = CommentPost {
            name: "",
            email: "",
            url: "",
            followup: true,
            reply_to: 12,
            honeypot: "",
            content_type: "assets.uuidasset",
            object_pk: "asset-1",
            timestamp: "1700000000",
            security_hash: "abc",
            comment: "Nice",
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["followup"], true);
        assert_eq!(json["reply_to"], 12);
        assert_eq!(json["object_pk"], "asset-1");
        assert_eq!(json["security_hash"], "abc");
    }
}
