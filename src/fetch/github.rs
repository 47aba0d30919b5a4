//! The `tgfeed://github-notifications` adapter: pages through the GitHub
//! notifications REST API, resolves pull-request subjects to filter by
//! author, maps to [`Item`]s, and marks every surfaced thread done.

use crate::model::Item;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u32 = 10;
const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct Notification {
    id: String,
    updated_at: DateTime<Utc>,
    subject: Subject,
    repository: Repository,
}

#[derive(Debug, Deserialize)]
struct Subject {
    title: String,
    url: Option<String>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct Repository {
    full_name: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    html_url: String,
    user: PullRequestUser,
}

#[derive(Debug, Deserialize)]
struct PullRequestUser {
    login: String,
}

pub struct GithubAdapter {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl GithubAdapter {
    pub fn new(client: reqwest::Client, token: String) -> Self {
        Self { client, token, base_url: API_BASE.to_string() }
    }

    #[cfg(test)]
    fn with_base_url(client: reqwest::Client, token: String, base_url: String) -> Self {
        Self { client, token, base_url }
    }

    /// Fetches unread notifications, resolves pull-request authors for
    /// denylist filtering, and marks every fetched thread as done.
    pub async fn fetch(&self, author_denylist: &[String]) -> Result<Vec<Item>, String> {
        let notifications = self.list_notifications().await?;

        let mut items = Vec::with_capacity(notifications.len());
        for n in &notifications {
            match self.to_item(n, author_denylist).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(thread = %n.id, error = %e, "failed to resolve notification subject");
                }
            }
        }

        for n in &notifications {
            if let Err(e) = self.mark_done(&n.id).await {
                tracing::warn!(thread = %n.id, error = %e, "failed to mark notification thread done");
            }
        }

        Ok(items)
    }

    async fn list_notifications(&self) -> Result<Vec<Notification>, String> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let resp = self
                .client
                .get(format!("{}/notifications", self.base_url))
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .header("User-Agent", "tgfeed")
                .query(&[("page", page.to_string()), ("per_page", PAGE_SIZE.to_string())])
                .send()
                .await
                .map_err(|e| e.to_string())?;

            if !resp.status().is_success() {
                return Err(format!("notifications page {page}: status {}", resp.status()));
            }

            let batch: Vec<Notification> = resp.json().await.map_err(|e| e.to_string())?;
            let got = batch.len();
            all.extend(batch);
            if (got as u32) < PAGE_SIZE {
                break;
            }
        }
        Ok(all)
    }

    async fn to_item(
        &self,
        n: &Notification,
        author_denylist: &[String],
    ) -> Result<Option<Item>, String> {
        let (link, author) = if n.subject.kind == "PullRequest" {
            match &n.subject.url {
                Some(url) => {
                    let pr = self.fetch_pull_request(url).await?;
                    (pr.html_url, Some(pr.user.login))
                }
                None => (n.repository.html_url.clone(), None),
            }
        } else {
            (n.repository.html_url.clone(), None)
        };

        if let Some(login) = &author {
            if author_denylist.iter().any(|denied| denied == login) {
                return Ok(None);
            }
        }

        Ok(Some(Item {
            title: Some(format!("[{}] {}", n.repository.full_name, n.subject.title)),
            link: Some(link),
            description: None,
            content: None,
            categories: vec![n.subject.kind.clone()],
            guid: Some(n.id.clone()),
            published: Some(n.updated_at),
            extensions: serde_json::Value::Null,
        }))
    }

    async fn fetch_pull_request(&self, api_url: &str) -> Result<PullRequest, String> {
        let resp = self
            .client
            .get(api_url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "tgfeed")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("pull request fetch: status {}", resp.status()));
        }
        resp.json().await.map_err(|e| e.to_string())
    }

    async fn mark_done(&self, thread_id: &str) -> Result<(), String> {
        let resp = self
            .client
            .delete(format!("{}/notifications/threads/{thread_id}", self.base_url))
            .bearer_auth(&self.token)
            .header("User-Agent", "tgfeed")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("mark-done: status {}", resp.status()));
        }
        Ok(())
    }
}
