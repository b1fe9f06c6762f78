use super::{arg, Invocation, Keyword, KeywordOutcome};
use crate::error::RuntimeError;
use crate::retry::with_retry;
use crate::value::Value;
use async_trait::async_trait;

/// JSON responses become structured values; anything else stays text.
fn response_value(body: String) -> Value {
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
            Value::from_json(json)
        }
        _ => Value::String(body),
    }
}

/// `x = GET url`
pub struct Get;

#[async_trait]
impl Keyword for Get {
    fn name(&self) -> &'static str {
        "GET"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let url = arg(&args, 0).to_string();
        let http = &inv.engine.collaborators().http;
        let body = with_retry(
            &inv.engine.config().retry,
            inv.ctx.cancellation(),
            "GET",
            || http.get(&url),
        )
        .await?;
        Ok(KeywordOutcome::Value(response_value(body)))
    }
}

/// `x = POST url, body`; lists and maps are sent as JSON.
pub struct Post;

#[async_trait]
impl Keyword for Post {
    fn name(&self) -> &'static str {
        "POST"
    }

    async fn invoke(
        &self,
        inv: Invocation<'_>,
        args: Vec<Value>,
    ) -> Result<KeywordOutcome, RuntimeError> {
        let url = arg(&args, 0).to_string();
        let body = match arg(&args, 1) {
            value @ (Value::List(_) | Value::Map(_)) => value.to_json().to_string(),
            value => value.to_string(),
        };
        let http = &inv.engine.collaborators().http;
        let response = with_retry(
            &inv.engine.config().retry,
            inv.ctx.cancellation(),
            "POST",
            || http.post(&url, &body),
        )
        .await?;
        Ok(KeywordOutcome::Value(response_value(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_json_objects_become_maps() {
        let mut expected = IndexMap::new();
        expected.insert("temp".to_string(), Value::Number(21.0));
        assert_eq!(response_value(r#"{"temp": 21}"#.into()), Value::Map(expected));
    }

    #[test]
    fn test_plain_text_and_scalars_stay_text() {
        assert_eq!(response_value("Sunny".into()), Value::from("Sunny"));
        assert_eq!(response_value("42".into()), Value::from("42"));
    }
}
