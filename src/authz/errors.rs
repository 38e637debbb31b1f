use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    // ---------- load errors ----------
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(tollgate::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(tollgate::authz::invalid_policy),
        help("Policy documents may contain `point`, `policy`, `role`, `user`, `token`, `object` and `page-group` nodes")
    )]
    InvalidPolicy(String),

    #[error("Invalid selector `{selector}`: {reason}")]
    #[diagnostic(
        code(tollgate::authz::invalid_selector),
        help("Resource selectors are an alias (app.Name), a type name (app\\Sub\\Name) or a prototype path (app/Sub/Name.php)")
    )]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(tollgate::authz::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation (e.g. context.hour)")
    )]
    InvalidCondition(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(tollgate::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the syntax")
    )]
    KdlParse(String),

    #[error("Undefined authorization point `{0}`")]
    #[diagnostic(
        code(tollgate::authz::undefined_point),
        help("Declare the point with: point \"<alias>\" app=\"<namespace>\" combining=\"deny-overrides\" default-effect=\"deny\"")
    )]
    UndefinedPoint(String),

    #[error("Authorization point `{0}` is declared more than once")]
    #[diagnostic(code(tollgate::authz::duplicate_point))]
    DuplicatePoint(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(tollgate::authz::io))]
    Io(#[from] std::io::Error),

    // ---------- evaluation errors ----------
    #[error("Unknown authentication token `{0}`")]
    #[diagnostic(code(tollgate::authz::unknown_token))]
    UnknownToken(String),

    #[error("Token `{token}` does not belong to `{username}`")]
    #[diagnostic(code(tollgate::authz::token_mismatch))]
    TokenMismatch { token: String, username: String },

    #[error("Undefined role `{0}`")]
    #[diagnostic(
        code(tollgate::authz::undefined_role),
        help("Declare the role with: role \"<name>\" or grant it to a user")
    )]
    UndefinedRole(String),

    #[error("Undefined object `{0}`")]
    #[diagnostic(
        code(tollgate::authz::undefined_object),
        help("Declare the object with: object \"<alias>\" extends=\"<parent>\"")
    )]
    UndefinedObject(String),

    #[error("Undefined page group `{0}`")]
    #[diagnostic(code(tollgate::authz::undefined_group))]
    UndefinedGroup(String),

    #[error("Resource `{0}` has no object, but the policy selects by object")]
    #[diagnostic(code(tollgate::authz::missing_object))]
    MissingObject(String),

    #[error("Condition evaluation failed: {0}")]
    #[diagnostic(code(tollgate::authz::condition))]
    Condition(String),
}

impl AuthzError {
    /// Errors raised while obtaining a point or its policy set. These abort a
    /// decision; everything else is recovered as an indeterminate result.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            AuthzError::PolicyLoad { .. }
                | AuthzError::InvalidPolicy(_)
                | AuthzError::InvalidSelector { .. }
                | AuthzError::InvalidCondition(_)
                | AuthzError::KdlParse(_)
                | AuthzError::UndefinedPoint(_)
                | AuthzError::DuplicatePoint(_)
                | AuthzError::Io(_)
        )
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        // Request bodies are checked by the extractors, so anything left is
        // the server's policies failing to load, except for an unknown point.
        let status = match &self {
            AuthzError::UndefinedPoint(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_classification() {
        assert!(AuthzError::UndefinedPoint("x".into()).is_load_error());
        assert!(AuthzError::KdlParse("bad".into()).is_load_error());
        assert!(!AuthzError::UndefinedRole("r".into()).is_load_error());
        assert!(!AuthzError::MissingObject("a".into()).is_load_error());
        assert!(!AuthzError::Condition("boom".into()).is_load_error());
    }

    #[test]
    fn test_response_status() {
        let resp = AuthzError::UndefinedPoint("p".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        for load_error in [
            AuthzError::InvalidPolicy("p".into()),
            AuthzError::InvalidCondition("c".into()),
            AuthzError::InvalidSelector {
                selector: "s".into(),
                reason: "r".into(),
            },
        ] {
            assert!(load_error.is_load_error());
            let resp = load_error.into_response();
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }

        let resp = AuthzError::UndefinedObject("o".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
