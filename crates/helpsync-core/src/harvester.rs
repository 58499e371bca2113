//! Harvester (C1): traverses the remote hierarchy (categories -> sections
//! -> articles) and emits the full current article set.
//!
//! Listings are dispatched in fixed-size thread waves over a blocking HTTP
//! client (`chunks(max_concurrent)` + `thread::spawn` + join-before-next-
//! wave) rather than an async runtime, keeping the concurrency bound exact
//! without pulling in a reactor. Failure of any single listing aborts the
//! whole harvest -- partial harvests are never emitted, since downstream
//! diffing treats absence as deletion.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::error::HarvestError;
use crate::reporter::Reporter;
use crate::types::Article;

#[derive(Debug, Deserialize)]
struct CategoryDto {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SectionDto {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ArticleDto {
    id: i64,
    title: String,
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoriesPage {
    categories: Vec<CategoryDto>,
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SectionsPage {
    sections: Vec<SectionDto>,
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticlesPage {
    articles: Vec<ArticleDto>,
    next_page: Option<String>,
}

pub struct Harvester {
    client: reqwest::blocking::Client,
    base_url: String,
    locale: String,
    concurrency: usize,
    reporter: Arc<Mutex<dyn Reporter + Send>>,
}

impl Harvester {
    pub fn new(
        base_url: impl Into<String>,
        locale: impl Into<String>,
        concurrency: usize,
        call_timeout: Duration,
        reporter: Arc<Mutex<dyn Reporter + Send>>,
    ) -> Result<Self, HarvestError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|source| HarvestError::Transport {
                url: base_url.clone().into(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            locale: locale.into(),
            concurrency: concurrency.max(1),
            reporter,
        })
    }

    fn help_center_base(&self) -> String {
        format!(
            "{}/api/v2/help_center/{}",
            self.base_url.trim_end_matches('/'),
            self.locale
        )
    }

    /// Traverse categories -> sections -> articles and return the full
    /// current set. Aborts with the originating error on any single
    /// listing failure.
    pub fn harvest(&self) -> Result<Vec<Article>, HarvestError> {
        let categories = self.fetch_all_categories()?;
        self.reporter
            .lock()
            .unwrap()
            .info(&format!("harvested {} categories", categories.len()));

        let sections = self.fan_out(&categories, |client, id| client.fetch_sections(id))?;
        let sections: Vec<i64> = sections.into_iter().flatten().collect();
        self.reporter
            .lock()
            .unwrap()
            .info(&format!("harvested {} sections", sections.len()));

        let article_batches = self.fan_out(&sections, |client, id| client.fetch_articles(id))?;
        let articles: Vec<Article> = article_batches.into_iter().flatten().collect();
        self.reporter
            .lock()
            .unwrap()
            .info(&format!("harvested {} articles", articles.len()));

        Ok(articles)
    }

    fn fetch_all_categories(&self) -> Result<Vec<i64>, HarvestError> {
        let mut url = format!("{}/categories.json?per_page=100&page=1", self.help_center_base());
        let mut ids = Vec::new();
        loop {
            let page: CategoriesPage = self.get_json(&url)?;
            ids.extend(page.categories.into_iter().map(|c| c.id));
            match page.next_page {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(ids)
    }

    fn fetch_sections(&self, category_id: i64) -> Result<Vec<i64>, HarvestError> {
        let mut url = format!(
            "{}/categories/{}/sections.json?per_page=100&page=1",
            self.help_center_base(),
            category_id
        );
        let mut ids = Vec::new();
        loop {
            let page: SectionsPage = self.get_json(&url)?;
            ids.extend(page.sections.into_iter().map(|s| s.id));
            match page.next_page {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(ids)
    }

    fn fetch_articles(&self, section_id: i64) -> Result<Vec<Article>, HarvestError> {
        let mut url = format!(
            "{}/sections/{}/articles.json?per_page=100&page=1",
            self.help_center_base(),
            section_id
        );
        let mut articles = Vec::new();
        loop {
            let page: ArticlesPage = self.get_json(&url)?;
            articles.extend(page.articles.into_iter().map(|a| Article {
                id: a.id,
                name: a.title,
                body: a.body.unwrap_or_default(),
                staged_path: None,
                artifact_id: None,
            }));
            match page.next_page {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(articles)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, HarvestError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|source| HarvestError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.text().map_err(|source| HarvestError::Transport {
            url: url.to_string(),
            source,
        })?;

        serde_json::from_str(&body).map_err(|source| HarvestError::Decode {
            url: url.to_string(),
            source,
        })
    }

    /// Run `f(self, id)` for each id in `ids`, in waves bounded by
    /// `self.concurrency` (`chunks(max_concurrent)` + join-before-next-wave),
    /// using `thread::scope` so the worker closures can borrow `self` and
    /// `f` directly instead of cloning into `'static` captures. The first
    /// failure observed in a wave aborts the whole fan-out.
    fn fan_out<T, F>(&self, ids: &[i64], f: F) -> Result<Vec<T>, HarvestError>
    where
        T: Send,
        F: Fn(&Harvester, i64) -> Result<T, HarvestError> + Sync,
    {
        let mut results = Vec::with_capacity(ids.len());
        let f = &f;
        for chunk in ids.chunks(self.concurrency) {
            let chunk_results: Vec<Result<T, HarvestError>> = thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|&id| scope.spawn(move || f(self, id)))
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("harvester worker thread panicked"))
                    .collect()
            });
            for result in chunk_results {
                results.push(result?);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::CollectingReporter;
    use tiny_http::{Response, Server};

    fn start_server(routes: Vec<(&'static str, String)>) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let base_url = format!("http://{addr}");
        let handle = thread::spawn(move || {
            for _ in 0..routes.len() {
                let request = match server.recv() {
                    Ok(r) => r,
                    Err(_) => return,
                };
                let url = request.url().to_string();
                let body = routes
                    .iter()
                    .find(|(path, _)| url.starts_with(path))
                    .map(|(_, body)| body.clone())
                    .unwrap_or_default();
                let response = Response::from_string(body).with_header(
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .unwrap(),
                );
                let _ = request.respond(response);
            }
        });
        (base_url, handle)
    }

    #[test]
    fn harvest_traverses_categories_sections_articles() {
        let categories = r#"{"categories":[{"id":1}],"next_page":null}"#.to_string();
        let sections = r#"{"sections":[{"id":10}],"next_page":null}"#.to_string();
        let articles =
            r#"{"articles":[{"id":100,"title":"Hello","body":"<p>hi</p>"}],"next_page":null}"#
                .to_string();

        let (base_url, handle) = start_server(vec![
            ("/api/v2/help_center/en-us/categories.json", categories),
            (
                "/api/v2/help_center/en-us/categories/1/sections.json",
                sections,
            ),
            (
                "/api/v2/help_center/en-us/sections/10/articles.json",
                articles,
            ),
        ]);

        let reporter = Arc::new(Mutex::new(CollectingReporter::default()));
        let harvester = Harvester::new(
            base_url,
            "en-us",
            4,
            Duration::from_secs(5),
            reporter,
        )
        .unwrap();

        let result = harvester.harvest().unwrap();
        handle.join().unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, 100);
        assert_eq!(result[0].name, "Hello");
        assert_eq!(result[0].body, "<p>hi</p>");
    }

    #[test]
    fn harvest_aborts_on_decode_error() {
        let (base_url, handle) = start_server(vec![(
            "/api/v2/help_center/en-us/categories.json",
            String::new(),
        )]);

        let reporter = Arc::new(Mutex::new(CollectingReporter::default()));
        let harvester =
            Harvester::new(base_url, "en-us", 4, Duration::from_secs(5), reporter).unwrap();

        let result = harvester.harvest();
        handle.join().unwrap();

        assert!(result.is_err());
    }
}
