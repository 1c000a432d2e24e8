use serde::{Deserialize, Serialize};
use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::error::Problem;

/// A GraphQL response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Response {
    /// The problems encountered during evaluation, serialized ahead of the
    /// data they degraded.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub errors: Vec<Problem>,

    /// The response data.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub data: Option<Value>,
}

/// Assemble the response envelope. A response with neither data nor errors
/// reports a single synthetic "Invalid query" error.
pub fn mk_response(data: Option<Value>, errors: Vec<Problem>) -> Response {
    if data.is_none() && errors.is_empty() {
        Response {
            errors: vec![Problem::new("Invalid query")],
            data: None,
        }
    } else {
        Response { errors, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_only() {
        let response = mk_response(Some(json!({"city": {"name": "Qandahar"}})), vec![]);
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"data":{"city":{"name":"Qandahar"}}}"#
        );
    }

    #[test]
    fn errors_precede_data() {
        let response = mk_response(
            Some(Value::Null),
            vec![Problem::new("Multiple matches")],
        );
        assert_eq!(
            serde_json::to_string(&response).unwrap(),
            r#"{"errors":[{"message":"Multiple matches"}],"data":null}"#
        );
    }

    #[test]
    fn errors_only() {
        let response = mk_response(None, vec![Problem::new("boom")]);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"errors": [{"message": "boom"}]})
        );
    }

    #[test]
    fn neither_is_an_invalid_query() {
        let response = mk_response(None, vec![]);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"errors": [{"message": "Invalid query"}]})
        );
    }

    #[test]
    fn builder_defaults_match_mk_response() {
        let built = Response::builder().data(Some(json!({"x": 1}))).build();
        assert_eq!(built, mk_response(Some(json!({"x": 1})), vec![]));

        let empty = Response::builder().build();
        assert_eq!(empty, Response { errors: vec![], data: None });
    }

    #[test]
    fn round_trips() {
        let response = mk_response(
            Some(json!({"hero": {"name": "R2-D2"}})),
            vec![Problem {
                message: "Name could not be fetched".to_string(),
                locations: vec![crate::error::Location { line: 6, column: 7 }],
                path: vec!["hero".to_string(), "name".to_string()],
            }],
        );
        let serialized = serde_json::to_string(&response).unwrap();
        let deserialized: Response = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, response);
    }
}
