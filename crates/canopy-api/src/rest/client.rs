// REST table client
//
// Wraps `reqwest::Client` with table URL construction, filter query
// encoding, `Prefer: return=representation` handling, and error-body
// decoding. Endpoint groups (topology, devices) are implemented as
// inherent methods in sibling files.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::rest::models::ApiErrorBody;
use crate::transport::{ApiCredentials, TransportConfig};

const REST_PREFIX: &str = "rest/v1";
const RETURN_REPRESENTATION: &str = "return=representation";

/// Raw HTTP client for the backend's table endpoints.
///
/// Every method returns decoded rows; mutations always ask the server to
/// echo the affected rows back so callers see the stored state.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
}

impl RestClient {
    /// Create a client that authenticates with the given credentials.
    ///
    /// `base_url` is the backend root (e.g. `https://xyz.example.co`); table
    /// paths are appended under `/rest/v1/`.
    pub fn new(
        base_url: Url,
        credentials: &ApiCredentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(credentials.headers()?)?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/rest/v1/{table}` with the given query pairs.
    pub(crate) fn table_url(&self, table: &str, query: &[(&str, String)]) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{REST_PREFIX}/{table}"))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// `GET /rest/v1/{table}?{query}`
    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, Error> {
        let url = self.table_url(table, query)?;
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        parse_rows(resp).await
    }

    /// `POST /rest/v1/{table}` returning the inserted row.
    pub async fn insert<T: DeserializeOwned>(
        &self,
        table: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        let url = self.table_url(table, &[])?;
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(body)
            .send()
            .await?;
        let rows: Vec<T> = parse_rows(resp).await?;
        rows.into_iter().next().ok_or_else(|| Error::Deserialization {
            message: format!("insert into {table} returned no rows"),
            body: String::new(),
        })
    }

    /// `PATCH /rest/v1/{table}?id=eq.{id}` returning the updated row.
    pub async fn update_by_id<T: DeserializeOwned>(
        &self,
        table: &str,
        id: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        let url = self.table_url(table, &[("id", eq(id))])?;
        debug!("PATCH {}", url);
        let resp = self
            .http
            .patch(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(body)
            .send()
            .await?;
        let rows: Vec<T> = parse_rows(resp).await?;
        rows.into_iter().next().ok_or_else(|| Error::NotFound {
            table: table.into(),
            id: id.into(),
        })
    }

    /// `DELETE /rest/v1/{table}?id=eq.{id}`.
    ///
    /// Fails with [`Error::NotFound`] when no row matched, so a concurrent
    /// delete is distinguishable from success.
    pub async fn delete_by_id(&self, table: &str, id: &str) -> Result<(), Error> {
        let url = self.table_url(table, &[("id", eq(id))])?;
        debug!("DELETE {}", url);
        let resp = self
            .http
            .delete(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = parse_rows(resp).await?;
        if rows.is_empty() {
            return Err(Error::NotFound {
                table: table.into(),
                id: id.into(),
            });
        }
        trace!(table, id, "deleted");
        Ok(())
    }

    /// `DELETE /rest/v1/{table}?{query}`, returning how many rows went.
    ///
    /// Matching nothing is not an error.
    pub async fn delete_where(&self, table: &str, query: &[(&str, String)]) -> Result<usize, Error> {
        let url = self.table_url(table, query)?;
        debug!("DELETE {}", url);
        let resp = self
            .http
            .delete(url)
            .header("Prefer", RETURN_REPRESENTATION)
            .send()
            .await?;
        let rows: Vec<serde_json::Value> = parse_rows(resp).await?;
        Ok(rows.len())
    }
}

// ── Filter helpers ───────────────────────────────────────────────────

/// `eq.{value}` filter operand.
pub fn eq(value: &str) -> String {
    format!("eq.{value}")
}

/// `in.(a,b,c)` filter operand.
pub fn in_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    let joined: Vec<&str> = values.into_iter().collect();
    format!("in.({})", joined.join(","))
}

/// Strip characters that carry meaning inside a logical filter expression.
pub(crate) fn sanitize_pattern(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, ',' | '(' | ')' | '*' | '"'))
        .collect::<String>()
        .trim()
        .to_owned()
}

// ── Response decoding ────────────────────────────────────────────────

/// Decode a JSON array response, or map the error body.
async fn parse_rows<T: DeserializeOwned>(resp: reqwest::Response) -> Result<Vec<T>, Error> {
    let status = resp.status();

    if status == StatusCode::UNAUTHORIZED {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Authentication {
            message: error_message(&body).unwrap_or_else(|| "invalid API key or token".into()),
        });
    }

    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(api_error(status, &body));
    }

    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(&body).map_err(|e| {
        let preview = &body[..body.len().min(200)];
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: body.clone(),
        }
    })
}

fn error_message(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
}

fn api_error(status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(parsed) => Error::Api {
            status: status.as_u16(),
            message: parsed
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").into()),
            code: parsed.code,
            details: parsed.details,
            hint: parsed.hint,
        },
        Err(_) => Error::Api {
            status: status.as_u16(),
            message: format!("HTTP {status}: {}", &body[..body.len().min(200)]),
            code: None,
            details: None,
            hint: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::with_client(
            reqwest::Client::new(),
            Url::parse("https://farm.example.co/").expect("valid url"),
        )
    }

    #[test]
    fn table_url_appends_prefix_and_query() {
        let url = client()
            .table_url("rows", &[("farm_id", eq("f1")), ("order", "position".into())])
            .expect("valid url");
        assert_eq!(
            url.as_str(),
            "https://farm.example.co/rest/v1/rows?farm_id=eq.f1&order=position"
        );
    }

    #[test]
    fn in_list_joins_values() {
        assert_eq!(in_list(["a", "b"]), "in.(a,b)");
    }

    #[test]
    fn sanitize_drops_filter_syntax() {
        assert_eq!(sanitize_pattern(" light,(shelf)* "), "lightshelf");
    }

    #[test]
    fn api_error_decodes_structured_body() {
        let err = api_error(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key value","details":null,"hint":null}"#,
        );
        assert!(err.is_unique_violation());
        assert_eq!(err.api_error_code(), Some("23505"));
    }

    #[test]
    fn api_error_falls_back_to_raw_body() {
        let err = api_error(StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            Error::Api {
                status, message, ..
            } => {
                assert_eq!(status, 502);
                assert!(message.contains("upstream down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
