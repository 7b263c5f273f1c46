//! HTTP client for the remote annotation platform
//!
//! One call to [`RemoteClient::fetch_jobs`] authenticates, pages through
//! `GET {api_url}/jobs`, drops jobs outside the filter, and yields the rest
//! one at a time. Jobs the caller already knows are yielded by id only;
//! the others get task/project names and annotation counts from the
//! per-entity endpoints. Task and project lookups are cached for the
//! lifetime of the stream only.

use annomirror_common::config::RemoteConfig;
use annomirror_common::normalize::{count_annotations, normalize_job};
use annomirror_common::{JobFilter, NormalizedJob};
use reqwest::header::AUTHORIZATION;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use super::{JobSource, JobStream, RemoteError, RemoteJob};

const USER_AGENT: &str = concat!("annomirror/", env!("CARGO_PKG_VERSION"));

/// Credentials in effect for one stream
struct Session {
    token: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct TaskInfo {
    name: Option<String>,
    project_id: Option<i64>,
}

/// Per-invocation lookup cache
#[derive(Default)]
struct Lookups {
    tasks: HashMap<i64, TaskInfo>,
    projects: HashMap<i64, Option<String>>,
}

/// One listing page
struct Listing {
    results: Vec<Value>,
    has_next: bool,
}

/// Remote annotation platform client
pub struct RemoteClient {
    http_client: reqwest::Client,
    api_url: String,
    web_url: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    page_size: u32,
    count_annotations: bool,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .cookie_store(true)
            .build()
            .map_err(|e| RemoteError::Unavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            web_url: config.web_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            token: config.token.clone(),
            page_size: config.page_size,
            count_annotations: config.count_annotations,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    /// Configured token, or a fresh one from `POST /auth/login`
    async fn authenticate(&self) -> Result<Session, RemoteError> {
        if let Some(token) = &self.token {
            return Ok(Session {
                token: Some(token.clone()),
            });
        }

        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            debug!("No remote credentials configured, using anonymous access");
            return Ok(Session { token: None });
        };

        let url = self.endpoint("auth/login");
        let response = self
            .http_client
            .post(&url)
            .json(&json!({"username": username, "password": password}))
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Unavailable(format!(
                "login as '{}' failed with HTTP {}",
                username,
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RemoteError::Unavailable(format!("unreadable login response: {}", e)))?;

        // The session cookie is kept by the cookie store either way
        let token = body
            .get("key")
            .or_else(|| body.get("token"))
            .and_then(Value::as_str)
            .map(str::to_string);

        info!(username = %username, "Authenticated with remote");
        Ok(Session { token })
    }

    /// GET returning JSON; a non-2xx status or bad body is `Malformed`
    async fn get_json(
        &self,
        session: &Session,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Value, RemoteError> {
        let mut request = self.http_client.get(url).query(query);
        if let Some(token) = &session.token {
            request = request.header(AUTHORIZATION, format!("Token {}", token));
        }

        let response = request.send().await.map_err(|e| transport_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Malformed(format!(
                "GET {} returned HTTP {}",
                url,
                status.as_u16()
            )));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                transport_error(url, e)
            } else {
                RemoteError::Malformed(format!("GET {} returned unreadable JSON: {}", url, e))
            }
        })
    }

    async fn fetch_page(
        &self,
        session: &Session,
        filter: &JobFilter,
        page: u32,
    ) -> Result<Listing, RemoteError> {
        let url = self.endpoint("jobs");
        let mut query = vec![
            ("page", page.to_string()),
            ("page_size", self.page_size.to_string()),
        ];
        query.extend(filter.query_pairs());

        // Any listing failure ends the run
        let body = self
            .get_json(session, &url, &query)
            .await
            .map_err(|e| match e {
                RemoteError::Malformed(detail) => {
                    RemoteError::Unavailable(format!("listing page {}: {}", page, detail))
                }
                other => other,
            })?;

        let Value::Object(mut body) = body else {
            return Err(RemoteError::Unavailable(format!(
                "listing page {} is not a JSON object",
                page
            )));
        };
        let results = match body.remove("results") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(RemoteError::Unavailable(format!(
                    "listing page {} has no results array",
                    page
                )))
            }
        };
        let has_next = body.get("next").map_or(false, |next| !next.is_null());

        Ok(Listing { results, has_next })
    }

    async fn task_info(
        &self,
        session: &Session,
        lookups: &mut Lookups,
        task_id: i64,
    ) -> Result<TaskInfo, RemoteError> {
        if let Some(info) = lookups.tasks.get(&task_id) {
            return Ok(info.clone());
        }

        let url = self.endpoint(&format!("tasks/{}", task_id));
        let body = self.get_json(session, &url, &[]).await?;
        let info = TaskInfo {
            name: body.get("name").and_then(Value::as_str).map(str::to_string),
            project_id: body.get("project_id").and_then(Value::as_i64),
        };

        lookups.tasks.insert(task_id, info.clone());
        Ok(info)
    }

    async fn project_name(
        &self,
        session: &Session,
        lookups: &mut Lookups,
        project_id: i64,
    ) -> Result<Option<String>, RemoteError> {
        if let Some(name) = lookups.projects.get(&project_id) {
            return Ok(name.clone());
        }

        let url = self.endpoint(&format!("projects/{}", project_id));
        let body = self.get_json(session, &url, &[]).await?;
        let name = body.get("name").and_then(Value::as_str).map(str::to_string);

        lookups.projects.insert(project_id, name.clone());
        Ok(name)
    }

    /// Normalize one listing record
    ///
    /// The task is looked up here only when the filter asks for a project
    /// the listing left out; everything else waits for [`Self::enrich_job`].
    async fn listed_job(
        &self,
        session: &Session,
        lookups: &mut Lookups,
        filter: &JobFilter,
        raw: Value,
    ) -> Result<NormalizedJob, RemoteError> {
        let mut job = normalize_job(&raw, &self.web_url)
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;

        if filter.project_id.is_some() && job.project_id.is_none() && job.task_id != 0 {
            self.fill_task(session, lookups, &mut job).await?;
        }
        Ok(job)
    }

    async fn fill_task(
        &self,
        session: &Session,
        lookups: &mut Lookups,
        job: &mut NormalizedJob,
    ) -> Result<(), RemoteError> {
        let task = self.task_info(session, lookups, job.task_id).await?;
        job.task_name = job.task_name.take().or(task.name);
        job.project_id = job.project_id.or(task.project_id);
        Ok(())
    }

    /// Fill in names and annotation counts the listing omits
    async fn enrich_job(
        &self,
        session: &Session,
        lookups: &mut Lookups,
        mut job: NormalizedJob,
    ) -> Result<NormalizedJob, RemoteError> {
        if job.task_id != 0 && (job.task_name.is_none() || job.project_id.is_none()) {
            self.fill_task(session, lookups, &mut job).await?;
        }

        if let (None, Some(project_id)) = (&job.project_name, job.project_id) {
            job.project_name = self.project_name(session, lookups, project_id).await?;
        }

        if self.count_annotations {
            let url = self.endpoint(&format!("jobs/{}/annotations", job.job_id));
            let annotations = self.get_json(session, &url, &[]).await?;
            let counts = count_annotations(&annotations);
            job.manual_annotation_count = counts.manual;
            job.interpolated_annotation_count = counts.interpolated;
        }

        Ok(job)
    }
}

impl JobSource for RemoteClient {
    fn fetch_jobs<'a>(&'a self, filter: &'a JobFilter, known: &'a HashSet<i64>) -> JobStream<'a> {
        Box::pin(async_stream::stream! {
            let session = match self.authenticate().await {
                Ok(session) => session,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut lookups = Lookups::default();
            let mut page = 1u32;

            loop {
                let listing = match self.fetch_page(&session, filter, page).await {
                    Ok(listing) => listing,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                debug!(page, jobs = listing.results.len(), "Fetched listing page");

                if listing.results.is_empty() {
                    break;
                }

                for raw in listing.results {
                    // Filter and known-set checks come before any per-job request
                    let item = match self.listed_job(&session, &mut lookups, filter, raw).await {
                        Ok(job) if !filter.matches(&job) => {
                            debug!(job_id = job.job_id, "Job outside filter");
                            continue;
                        }
                        Ok(job) if known.contains(&job.job_id) => {
                            Ok(RemoteJob::Known { job_id: job.job_id })
                        }
                        Ok(job) => self
                            .enrich_job(&session, &mut lookups, job)
                            .await
                            .map(RemoteJob::Fetched),
                        Err(e) => Err(e),
                    };

                    match item {
                        Ok(job) => {
                            yield Ok(job);
                        }
                        Err(e) => {
                            let unavailable = e.is_unavailable();
                            yield Err(e);
                            if unavailable {
                                return;
                            }
                        }
                    }
                }

                if !listing.has_next {
                    break;
                }
                page += 1;
            }
        })
    }
}

fn transport_error(url: &str, e: reqwest::Error) -> RemoteError {
    if e.is_timeout() {
        RemoteError::Unavailable(format!("request to {} timed out", url))
    } else {
        RemoteError::Unavailable(format!("request to {} failed: {}", url, e))
    }
}
