//! The built-in liveness service.

use http::Method;
use switchyard_core::{handler_fn, Args, Endpoint, HandlerShape, RpcError, SetupError};

use crate::http::Route;
use crate::service::Service;

/// Path of the ping endpoint.
pub const PING_PATH: &str = "/_ping";

/// Name of the ping service.
pub const PING_SERVICE: &str = "_ping";

/// A service answering `GET /_ping` with `OK`.
pub fn service() -> Result<Service, SetupError> {
    let endpoint = Endpoint::builder(
        "ping",
        HandlerShape::function(),
        handler_fn(|_: Args| async { Ok::<_, RpcError>(serde_json::Value::from("OK")) }),
    )
    .document("Liveness check.")
    .build()?;
    endpoint.attach_child(Route::new(PING_PATH).methods([Method::GET, Method::HEAD]).name("ping"));

    let mut service = Service::new(PING_SERVICE);
    service.add_endpoint(endpoint)?;
    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_route() {
        let service = service().unwrap();
        let endpoint = service.endpoint("ping").unwrap();
        let routes = endpoint.children::<Route>();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].path, PING_PATH);
        assert!(endpoint.signature().params().is_empty());
    }
}
