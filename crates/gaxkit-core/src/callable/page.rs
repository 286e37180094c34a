//! Page streaming: flattens a paginated RPC into one lazy stream of resources.

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callable::call::ApiCall;
use crate::callable::timeout::WithTimeout;
use crate::error::{CallError, FieldError};

/// Names the request and response fields that carry pagination state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// Field of the request that receives the page token.
    pub request_page_token_field: String,
    /// Field of the response holding the next page token.
    pub response_page_token_field: String,
    /// Repeated field of the response to stream.
    pub resource_field: String,
}

impl PageDescriptor {
    pub fn new(
        request_page_token_field: impl Into<String>,
        response_page_token_field: impl Into<String>,
        resource_field: impl Into<String>,
    ) -> Self {
        Self {
            request_page_token_field: request_page_token_field.into(),
            response_page_token_field: response_page_token_field.into(),
            resource_field: resource_field.into(),
        }
    }
}

/// An opaque next-page token. An empty token ends the stream.
pub trait PageToken {
    fn is_empty_token(&self) -> bool;
}

impl PageToken for String {
    fn is_empty_token(&self) -> bool {
        self.is_empty()
    }
}

impl<T: PageToken> PageToken for Option<T> {
    fn is_empty_token(&self) -> bool {
        self.as_ref().map_or(true, PageToken::is_empty_token)
    }
}

macro_rules! int_page_token {
    ($($t:ty),*) => {
        $(impl PageToken for $t {
            fn is_empty_token(&self) -> bool {
                *self == 0
            }
        })*
    };
}

int_page_token!(i32, i64, u32, u64, usize);

impl PageToken for Value {
    fn is_empty_token(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n.as_f64() == Some(0.0),
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
        }
    }
}

/// Write access to a request's page-token field, by name.
pub trait PageRequest<Token> {
    fn set_page_token(&mut self, field: &str, token: Token) -> Result<(), FieldError>;
}

/// Read access to a response's page-token and resource fields, by name.
pub trait PageResponse {
    type Token: PageToken + Send;
    type Resource: Send;

    fn next_page_token(&self, field: &str) -> Result<Self::Token, FieldError>;

    /// Move the resources out of `field`, in the order the server returned them.
    fn take_resources(&mut self, field: &str) -> Result<Vec<Self::Resource>, FieldError>;
}

// JSON messages: a missing field reads as empty, matching proto3 JSON which
// omits default values.
impl PageRequest<Value> for Value {
    fn set_page_token(&mut self, field: &str, token: Value) -> Result<(), FieldError> {
        let obj = self.as_object_mut().ok_or_else(|| FieldError::NotAnObject {
            field: field.to_string(),
        })?;
        obj.insert(field.to_string(), token);
        Ok(())
    }
}

impl PageResponse for Value {
    type Token = Value;
    type Resource = Value;

    fn next_page_token(&self, field: &str) -> Result<Value, FieldError> {
        let obj = self.as_object().ok_or_else(|| FieldError::NotAnObject {
            field: field.to_string(),
        })?;
        Ok(obj.get(field).cloned().unwrap_or(Value::Null))
    }

    fn take_resources(&mut self, field: &str) -> Result<Vec<Value>, FieldError> {
        let obj = self.as_object_mut().ok_or_else(|| FieldError::NotAnObject {
            field: field.to_string(),
        })?;
        match obj.remove(field) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(FieldError::WrongType {
                field: field.to_string(),
                expected: "array",
            }),
        }
    }
}

/// Drives a timeout-bound call page by page.
///
/// Retry, when configured, must already wrap the inner call so that a failed
/// page fetch is retried on its own instead of restarting from the first page.
pub struct PageStreamer<C> {
    call: WithTimeout<C>,
    descriptor: PageDescriptor,
}

struct Cursor<C, Req> {
    call: WithTimeout<C>,
    descriptor: PageDescriptor,
    request: Req,
}

impl<C> PageStreamer<C> {
    pub fn new(call: WithTimeout<C>, descriptor: PageDescriptor) -> Self {
        Self { call, descriptor }
    }

    /// Lazily stream every resource, starting from `request`.
    ///
    /// A page is only fetched once the previous page has been consumed, so
    /// dropping the stream early issues no further calls.
    pub fn stream<'a, Req, Resp>(
        self,
        request: Req,
    ) -> BoxStream<'a, Result<Resp::Resource, CallError<C::Error>>>
    where
        C: ApiCall<Req, Response = Resp> + 'a,
        Req: PageRequest<Resp::Token> + Clone + Send + 'static,
        Resp: PageResponse + Send + 'a,
    {
        let cursor = Cursor {
            call: self.call,
            descriptor: self.descriptor,
            request,
        };

        stream::try_unfold(Some(cursor), |state| async move {
            let Some(cursor) = state else {
                return Ok(None);
            };
            let (items, next) = next_page(cursor).await?;
            let page = stream::iter(items.into_iter().map(Ok::<_, CallError<C::Error>>));
            Ok::<_, CallError<C::Error>>(Some((page, next)))
        })
        .try_flatten()
        .boxed()
    }
}

/// Fetch one page and advance the cursor, or drop it once the token is empty.
async fn next_page<C, Req, Resp>(
    mut cursor: Cursor<C, Req>,
) -> Result<(Vec<Resp::Resource>, Option<Cursor<C, Req>>), CallError<C::Error>>
where
    C: ApiCall<Req, Response = Resp>,
    Req: PageRequest<Resp::Token> + Clone + Send + 'static,
    Resp: PageResponse,
{
    let mut response = cursor
        .call
        .invoke(cursor.request.clone())
        .await
        .map_err(CallError::Rpc)?;
    let items = response.take_resources(&cursor.descriptor.resource_field)?;
    let token = response.next_page_token(&cursor.descriptor.response_page_token_field)?;
    tracing::trace!(items = items.len(), "fetched page");

    if token.is_empty_token() {
        return Ok((items, None));
    }
    cursor
        .request
        .set_page_token(&cursor.descriptor.request_page_token_field, token)?;
    Ok((items, Some(cursor)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::callable::call::from_fn;
    use crate::status::{Code, Status};

    fn descriptor() -> PageDescriptor {
        PageDescriptor::new("page_token", "next_page_token", "items")
    }

    #[test]
    fn json_token_emptiness() {
        assert!(Value::Null.is_empty_token());
        assert!(json!("").is_empty_token());
        assert!(json!(0).is_empty_token());
        assert!(!json!("t1").is_empty_token());
        assert!(!json!(3).is_empty_token());
        assert!(None::<String>.is_empty_token());
        assert!(!Some("t".to_string()).is_empty_token());
    }

    #[test]
    fn json_field_access() {
        let mut resp = json!({ "items": [1, 2], "next_page_token": "t1" });
        assert_eq!(resp.next_page_token("next_page_token").unwrap(), json!("t1"));
        assert_eq!(resp.take_resources("items").unwrap(), vec![json!(1), json!(2)]);
        assert!(resp.take_resources("items").unwrap().is_empty());
        assert!(resp.next_page_token("missing").unwrap().is_empty_token());

        let mut bad = json!({ "items": "nope" });
        assert_eq!(
            bad.take_resources("items"),
            Err(FieldError::WrongType {
                field: "items".into(),
                expected: "array"
            })
        );

        let mut req = json!([]);
        assert!(matches!(
            req.set_page_token("page_token", json!("t")),
            Err(FieldError::NotAnObject { .. })
        ));
    }

    #[tokio::test]
    async fn yields_all_pages_in_order() {
        let requests = Mutex::new(Vec::new());
        let list = from_fn(|req: Value, _timeout: Duration| {
            requests.lock().unwrap().push(req.clone());
            async move {
                let resp = match req.get("page_token").and_then(Value::as_str) {
                    None => json!({ "items": ["a", "b"], "next_page_token": "t1" }),
                    Some("t1") => json!({ "items": ["c"], "next_page_token": "" }),
                    Some(other) => panic!("unexpected token {other}"),
                };
                Ok::<_, Status>(resp)
            }
        });

        let streamer = PageStreamer::new(WithTimeout::new(&list, Duration::from_secs(1)), descriptor());
        let items: Vec<Value> = streamer.stream(json!({})).try_collect().await.unwrap();

        assert_eq!(items, vec![json!("a"), json!("b"), json!("c")]);
        let requests = requests.into_inner().unwrap();
        assert_eq!(requests, vec![json!({}), json!({ "page_token": "t1" })]);
    }

    #[tokio::test]
    async fn stops_early_without_fetching_more() {
        let calls = AtomicU32::new(0);
        let endless = from_fn(|_req: Value, _timeout: Duration| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Status>(json!({ "items": [n, n], "next_page_token": n + 1 })) }
        });

        let streamer = PageStreamer::new(WithTimeout::new(&endless, Duration::from_secs(1)), descriptor());
        let first: Vec<Value> = streamer.stream(json!({})).take(3).try_collect().await.unwrap();

        assert_eq!(first, vec![json!(0), json!(0), json!(1)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn page_error_ends_stream() {
        let calls = AtomicU32::new(0);
        let failing = from_fn(|_req: Value, _timeout: Duration| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Ok(json!({ "items": [1], "next_page_token": "t1" }))
                } else {
                    Err(Status::new(Code::PermissionDenied, "no"))
                }
            }
        });

        let streamer = PageStreamer::new(WithTimeout::new(&failing, Duration::from_secs(1)), descriptor());
        let results: Vec<_> = streamer.stream(json!({})).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), &json!(1));
        let err = results[1].as_ref().unwrap_err();
        assert_eq!(err.as_rpc().unwrap().code, Code::PermissionDenied);
    }
}
