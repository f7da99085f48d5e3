use crate::api::{
    api_add_category, api_add_entry, api_buffer, api_delete_category, api_delete_entry,
    api_edit_category, api_list_categories, api_list_entries, api_reload, api_rename_entry,
    api_set_expansion, api_status, api_switch_category, api_toggle_entry, EditCategoryBody,
    EntryBody, NewCategoryBody, RenameBody, SharedApp,
};
use crate::api::ApiResponse;
use crate::error::{Result, TexError};
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};
use warp::http::StatusCode;
use warp::reject::{self, Reject};
use warp::{Filter, Rejection, Reply};

/// Who may call the control API: requests must name the loopback host and
/// carry `Authorization: Bearer <token>`.
///
/// The API hands out decrypted expansions and the typed-key buffer, so no
/// CORS headers are sent and browsers never get to read a response.
#[derive(Clone)]
pub struct ApiAccess {
    token: Arc<str>,
    hosts: Arc<[String]>,
}

impl ApiAccess {
    pub fn new(token: &str, port: u16) -> Self {
        let hosts = vec![format!("127.0.0.1:{}", port), format!("localhost:{}", port)];
        Self {
            token: Arc::from(token),
            hosts: hosts.into(),
        }
    }

    fn allows_host(&self, host: Option<&str>) -> bool {
        host.map(|host| self.hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)))
            .unwrap_or(false)
    }

    fn allows_token(&self, authorization: Option<&str>) -> bool {
        authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|presented| presented.trim() == &*self.token)
            .unwrap_or(false)
    }
}

#[derive(Debug)]
struct ForeignHost;
impl Reject for ForeignHost {}

#[derive(Debug)]
struct Unauthorized;
impl Reject for Unauthorized {}

fn authorized(access: ApiAccess) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("host")
        .and(warp::header::optional::<String>("authorization"))
        .and_then(move |host: Option<String>, authorization: Option<String>| {
            let access = access.clone();
            async move {
                if !access.allows_host(host.as_deref()) {
                    debug!(host = ?host, "Rejected control request for a foreign host");
                    return Err(reject::custom(ForeignHost));
                }
                if !access.allows_token(authorization.as_deref()) {
                    return Err(reject::custom(Unauthorized));
                }
                Ok(())
            }
        })
        .untuple_one()
}

async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (status, message) = if err.find::<ForeignHost>().is_some() {
        (StatusCode::FORBIDDEN, "Host not allowed")
    } else if err.find::<Unauthorized>().is_some() {
        (StatusCode::UNAUTHORIZED, "Invalid or missing token")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::BAD_REQUEST, "Bad request")
    };

    let body = warp::reply::json(&ApiResponse::<()>::error(message.to_string()));
    Ok(warp::reply::with_status(body, status))
}

#[derive(Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

#[derive(Deserialize)]
struct TriggerQuery {
    trigger: String,
}

#[derive(Deserialize)]
struct TriggerBody {
    trigger: String,
}

#[derive(Deserialize)]
struct IdQuery {
    id: String,
}

#[derive(Deserialize)]
struct ExpansionToggle {
    enabled: bool,
}

fn with_app(app: SharedApp) -> impl Filter<Extract = (SharedApp,), Error = Infallible> + Clone {
    warp::any().map(move || app.clone())
}

/// Every control route behind the access check, without a bound address
pub fn routes(
    app: SharedApp,
    access: ApiAccess,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let list_entries = warp::path!("api" / "entries")
        .and(warp::get())
        .and(warp::query::<CategoryQuery>())
        .and(with_app(app.clone()))
        .map(|query: CategoryQuery, app: SharedApp| {
            warp::reply::json(&api_list_entries(&app, query.category.as_deref()))
        });

    let add_entry = warp::path!("api" / "entries")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: EntryBody, app: SharedApp| warp::reply::json(&api_add_entry(&app, body)));

    let rename_entry = warp::path!("api" / "entries" / "rename")
        .and(warp::put())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: RenameBody, app: SharedApp| {
            warp::reply::json(&api_rename_entry(&app, body))
        });

    let delete_entry = warp::path!("api" / "entries")
        .and(warp::delete())
        .and(warp::query::<TriggerQuery>())
        .and(with_app(app.clone()))
        .map(|query: TriggerQuery, app: SharedApp| {
            warp::reply::json(&api_delete_entry(&app, &query.trigger))
        });

    let toggle_entry = warp::path!("api" / "entries" / "toggle")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: TriggerBody, app: SharedApp| {
            warp::reply::json(&api_toggle_entry(&app, &body.trigger))
        });

    let list_categories = warp::path!("api" / "categories")
        .and(warp::get())
        .and(with_app(app.clone()))
        .map(|app: SharedApp| warp::reply::json(&api_list_categories(&app)));

    let add_category = warp::path!("api" / "categories")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: NewCategoryBody, app: SharedApp| {
            warp::reply::json(&api_add_category(&app, body))
        });

    let edit_category = warp::path!("api" / "categories")
        .and(warp::put())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: EditCategoryBody, app: SharedApp| {
            warp::reply::json(&api_edit_category(&app, body))
        });

    let delete_category = warp::path!("api" / "categories")
        .and(warp::delete())
        .and(warp::query::<IdQuery>())
        .and(with_app(app.clone()))
        .map(|query: IdQuery, app: SharedApp| {
            warp::reply::json(&api_delete_category(&app, &query.id))
        });

    let switch_category = warp::path!("api" / "categories" / "switch")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: IdQuery, app: SharedApp| {
            warp::reply::json(&api_switch_category(&app, &body.id))
        });

    let set_expansion = warp::path!("api" / "expansion")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_app(app.clone()))
        .map(|body: ExpansionToggle, app: SharedApp| {
            warp::reply::json(&api_set_expansion(&app, body.enabled))
        });

    let buffer = warp::path!("api" / "buffer")
        .and(warp::get())
        .and(with_app(app.clone()))
        .map(|app: SharedApp| warp::reply::json(&api_buffer(&app)));

    let status = warp::path!("api" / "status")
        .and(warp::get())
        .and(with_app(app.clone()))
        .map(|app: SharedApp| warp::reply::json(&api_status(&app)));

    let reload = warp::path!("api" / "reload")
        .and(warp::post())
        .and(with_app(app))
        .map(|app: SharedApp| warp::reply::json(&api_reload(&app)));

    let health = warp::path!("health").map(|| "TEx API is running");

    let api = list_entries
        .or(add_entry)
        .or(rename_entry)
        .or(delete_entry)
        .or(toggle_entry)
        .or(list_categories)
        .or(add_category)
        .or(edit_category)
        .or(delete_category)
        .or(switch_category)
        .or(set_expansion)
        .or(buffer)
        .or(status)
        .or(reload);

    health
        .or(authorized(access).and(api))
        .recover(handle_rejection)
}

/// Serve the control API on the loopback interface until the runtime stops
pub async fn start_api_server(app: SharedApp, port: u16, token: &str) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let (bound, server) = warp::serve(routes(app, ApiAccess::new(token, port)))
        .try_bind_ephemeral(addr)
        .map_err(|e| TexError::Other(format!("Failed to bind control API on {}: {}", addr, e)))?;
    info!(addr = %bound, "Control API listening");
    server.await;

    Ok(())
}
