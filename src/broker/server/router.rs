use hyper::{Method, Uri};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// Parsed request path and action. Path segments are percent-decoded.
#[derive(Debug, PartialEq)]
pub enum Route<'a> {
    Healthz,
    Metrics,
    ApiVersion,
    Acquire,
    Unlock,
    UnlockSet,
    CreateResource,
    DestroyResource { id: Cow<'a, str> },
    DisableResource { id: Cow<'a, str> },
    EnableResource { id: Cow<'a, str> },
    ListResources { resource_set: Option<Cow<'a, str>> },
    /// Known path, wrong method.
    Unsupported,
    Unknown,
}

impl Route<'_> {
    pub fn action_name(&self) -> &'static str {
        match self {
            Route::Healthz => "healthz",
            Route::Metrics => "metrics",
            Route::ApiVersion => "get-api-version",
            Route::Acquire => "acquire",
            Route::Unlock => "unlock",
            Route::UnlockSet => "unlock-set",
            Route::CreateResource => "create-resource",
            Route::DestroyResource { .. } => "destroy-resource",
            Route::DisableResource { .. } => "disable-resource",
            Route::EnableResource { .. } => "enable-resource",
            Route::ListResources { .. } => "list-resources",
            Route::Unsupported => "unsupported",
            Route::Unknown => "unknown",
        }
    }
}

pub fn parse<'a>(method: &Method, uri: &'a Uri) -> Route<'a> {
    let Some((expected_method, route)) = match_path(uri.path()) else {
        return Route::Unknown;
    };

    if method == expected_method {
        route
    } else {
        Route::Unsupported
    }
}

fn match_path(path: &str) -> Option<(Method, Route<'_>)> {
    match path {
        "/healthz" => return Some((Method::GET, Route::Healthz)),
        "/metrics" => return Some((Method::GET, Route::Metrics)),
        "/api/version" => return Some((Method::GET, Route::ApiVersion)),
        "/api/resources/acquire" => return Some((Method::POST, Route::Acquire)),
        "/api/resources/unlock" => return Some((Method::POST, Route::Unlock)),
        "/api/resources/unlock_set" => return Some((Method::POST, Route::UnlockSet)),
        "/api/resources/list" => {
            return Some((Method::GET, Route::ListResources { resource_set: None }));
        }
        "/api/resource/create" => return Some((Method::POST, Route::CreateResource)),
        _ => {}
    }

    if let Some(rest) = path.strip_prefix("/api/resources/") {
        let resource_set = rest.strip_suffix("/list").and_then(decode_segment)?;
        return Some((
            Method::GET,
            Route::ListResources {
                resource_set: Some(resource_set),
            },
        ));
    }

    let rest = path.strip_prefix("/api/resource/")?;
    let (id, action) = rest.split_once('/')?;
    let id = decode_segment(id)?;

    let route = match action {
        "destroy" => Route::DestroyResource { id },
        "disable" => Route::DisableResource { id },
        "enable" => Route::EnableResource { id },
        _ => return None,
    };
    Some((Method::POST, route))
}

fn decode_segment(value: &str) -> Option<Cow<'_, str>> {
    if value.is_empty() || value.contains('/') {
        return None;
    }
    percent_decode_str(value).decode_utf8().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_static_routes() {
        let cases = [
            (Method::GET, "/healthz", Route::Healthz),
            (Method::GET, "/metrics", Route::Metrics),
            (Method::GET, "/api/version", Route::ApiVersion),
            (Method::POST, "/api/resources/acquire", Route::Acquire),
            (Method::POST, "/api/resources/unlock", Route::Unlock),
            (Method::POST, "/api/resources/unlock_set", Route::UnlockSet),
            (Method::POST, "/api/resource/create", Route::CreateResource),
            (
                Method::GET,
                "/api/resources/list",
                Route::ListResources { resource_set: None },
            ),
        ];

        for (method, uri, expected) in cases {
            let uri: Uri = uri.parse().unwrap();
            assert_eq!(parse(&method, &uri), expected, "{method} {uri}");
        }
    }

    #[test]
    fn test_parse_list_resource_set() {
        let uri: Uri = "/api/resources/printers/list".parse().unwrap();
        assert_eq!(
            parse(&Method::GET, &uri),
            Route::ListResources {
                resource_set: Some("printers".into())
            }
        );

        let uri: Uri = "/api/resources/a/b/list".parse().unwrap();
        assert_eq!(parse(&Method::GET, &uri), Route::Unknown);
    }

    #[test]
    fn test_parse_resource_actions() {
        let uri: Uri = "/api/resource/abc/destroy".parse().unwrap();
        assert_eq!(
            parse(&Method::POST, &uri),
            Route::DestroyResource { id: "abc".into() }
        );

        let uri: Uri = "/api/resource/abc/disable".parse().unwrap();
        assert_eq!(
            parse(&Method::POST, &uri),
            Route::DisableResource { id: "abc".into() }
        );

        let uri: Uri = "/api/resource/abc/enable".parse().unwrap();
        assert_eq!(
            parse(&Method::POST, &uri),
            Route::EnableResource { id: "abc".into() }
        );

        let uri: Uri = "/api/resource/abc/explode".parse().unwrap();
        assert_eq!(parse(&Method::POST, &uri), Route::Unknown);

        let uri: Uri = "/api/resource//destroy".parse().unwrap();
        assert_eq!(parse(&Method::POST, &uri), Route::Unknown);
    }

    #[test]
    fn test_parse_decodes_segments() {
        let uri: Uri = "/api/resources/lab%20boards/list".parse().unwrap();
        assert_eq!(
            parse(&Method::GET, &uri),
            Route::ListResources {
                resource_set: Some("lab boards".into())
            }
        );

        let uri: Uri = "/api/resources/caf%C3%A9/list".parse().unwrap();
        assert_eq!(
            parse(&Method::GET, &uri),
            Route::ListResources {
                resource_set: Some("café".into())
            }
        );

        let uri: Uri = "/api/resource/a%2Db/disable".parse().unwrap();
        assert_eq!(
            parse(&Method::POST, &uri),
            Route::DisableResource { id: "a-b".into() }
        );

        let uri: Uri = "/api/resources/%FF/list".parse().unwrap();
        assert_eq!(parse(&Method::GET, &uri), Route::Unknown);
    }

    #[test]
    fn test_parse_wrong_method() {
        let uri: Uri = "/api/resources/acquire".parse().unwrap();
        assert_eq!(parse(&Method::GET, &uri), Route::Unsupported);

        let uri: Uri = "/api/resources/list".parse().unwrap();
        assert_eq!(parse(&Method::DELETE, &uri), Route::Unsupported);

        let uri: Uri = "/api/resource/abc/destroy".parse().unwrap();
        assert_eq!(parse(&Method::GET, &uri), Route::Unsupported);
    }

    #[test]
    fn test_parse_unknown() {
        let uri: Uri = "/v2/".parse().unwrap();
        assert_eq!(parse(&Method::GET, &uri), Route::Unknown);
        assert_eq!(Route::Unknown.action_name(), "unknown");
    }
}
