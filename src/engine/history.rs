//! The per-evaluation record of dispatched requests and their responses.
//!
//! History is keyed `(outer block name, request name)` and populated
//! strictly in dispatch order. Entries are never overwritten or removed;
//! a request that failed has no response entry. One history lives for the
//! duration of a single engine evaluation and is dropped on return.

use crate::api::{Request, Response};
use crate::error::Error;
use indexmap::IndexMap;
use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub struct EvaluationHistory {
    requests: IndexMap<String, IndexMap<String, Request>>,
    responses: IndexMap<String, IndexMap<String, Response>>,
}

impl EvaluationHistory {
    /// Records a dispatched request.
    ///
    /// # Errors
    ///
    /// Inserting over an existing entry is an internal sequencing bug and
    /// is rejected.
    pub fn add_request(&mut self, outer: &str, name: &str, request: Request) -> Result<(), Error> {
        let block = self.requests.entry(outer.to_string()).or_default();
        if block.contains_key(name) {
            return Err(Error::validation(format!(
                "request '{name}' already recorded in block '{outer}'"
            )));
        }
        block.insert(name.to_string(), request);
        Ok(())
    }

    /// Records a successful response for an already-recorded request.
    ///
    /// # Errors
    ///
    /// Duplicate entries are rejected, as with [`Self::add_request`].
    pub fn add_response(
        &mut self,
        outer: &str,
        name: &str,
        response: Response,
    ) -> Result<(), Error> {
        let block = self.responses.entry(outer.to_string()).or_default();
        if block.contains_key(name) {
            return Err(Error::validation(format!(
                "response '{name}' already recorded in block '{outer}'"
            )));
        }
        block.insert(name.to_string(), response);
        Ok(())
    }

    #[must_use]
    pub fn request(&self, outer: &str, name: &str) -> Option<&Request> {
        self.requests.get(outer)?.get(name)
    }

    #[must_use]
    pub fn response(&self, outer: &str, name: &str) -> Option<&Response> {
        self.responses.get(outer)?.get(name)
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.values().map(IndexMap::len).sum()
    }

    #[must_use]
    pub fn response_count(&self) -> usize {
        self.responses.values().map(IndexMap::len).sum()
    }

    /// The recorded requests as a JSON view for templates and expressions.
    /// With `flatten` (the single-block convention) the sole block's inner
    /// map is returned directly; otherwise the view is keyed by outer
    /// block.
    #[must_use]
    pub fn requests_value(&self, flatten: bool) -> Value {
        two_level_value(&self.requests, flatten, |req| {
            serde_json::to_value(req).unwrap_or(Value::Null)
        })
    }

    /// The recorded responses as a JSON view; see [`Self::requests_value`].
    #[must_use]
    pub fn responses_value(&self, flatten: bool) -> Value {
        two_level_value(&self.responses, flatten, |resp| {
            serde_json::to_value(resp).unwrap_or(Value::Null)
        })
    }
}

fn two_level_value<T>(
    map: &IndexMap<String, IndexMap<String, T>>,
    flatten: bool,
    to_value: impl Fn(&T) -> Value,
) -> Value {
    let inner_map = |entries: &IndexMap<String, T>| {
        Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_value(v)))
                .collect::<Map<String, Value>>(),
        )
    };

    if flatten {
        return map
            .values()
            .next()
            .map_or_else(|| Value::Object(Map::new()), inner_map);
    }

    Value::Object(
        map.iter()
            .map(|(outer, entries)| (outer.clone(), inner_map(entries)))
            .collect::<Map<String, Value>>(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Operation;
    use serde_json::json;

    #[test]
    fn entries_are_recorded_in_order() {
        let mut history = EvaluationHistory::default();
        history
            .add_request("c", "one", Request::new(Operation::Read, "kv/a"))
            .unwrap();
        history
            .add_request("c", "two", Request::new(Operation::Read, "kv/b"))
            .unwrap();

        let view = history.requests_value(false);
        let keys: Vec<_> = view["c"].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["one", "two"]);
    }

    #[test]
    fn overwrites_are_rejected() {
        let mut history = EvaluationHistory::default();
        history
            .add_request("c", "one", Request::default())
            .unwrap();
        assert!(history
            .add_request("c", "one", Request::default())
            .is_err());
    }

    #[test]
    fn flatten_uses_the_unnamed_block() {
        let mut history = EvaluationHistory::default();
        let mut resp = Response::default();
        resp.data.insert("next".into(), json!("b"));
        history.add_response("", "one", resp).unwrap();

        let view = history.responses_value(true);
        assert_eq!(view["one"]["data"]["next"], json!("b"));

        let nested = history.responses_value(false);
        assert_eq!(nested[""]["one"]["data"]["next"], json!("b"));
    }

    #[test]
    fn failed_requests_leave_no_response() {
        let mut history = EvaluationHistory::default();
        history
            .add_request("c", "one", Request::default())
            .unwrap();
        assert_eq!(history.request_count(), 1);
        assert_eq!(history.response_count(), 0);
        assert!(history.response("c", "one").is_none());
    }
}
