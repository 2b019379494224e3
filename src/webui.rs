use crate::data::{DataClient, Location, Operator};
use crate::error::Error;
use crate::journey_cache::TIPLOC_TTL;
use crate::service_query::{LocationFilter, ServiceFilters, ServiceResponse};

use chrono::{DateTime, NaiveDate, Utc};
use rocket::http::Status;
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Request, State};
use serde::{Deserialize, Serialize};

use std::fmt;

#[derive(Debug)]
pub struct WebUiError {
    what: String,
}

impl fmt::Display for WebUiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error in web API: {}", self.what)
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<String>,
}

#[derive(Serialize)]
struct NotFoundResponse {
    error: String,
}

#[derive(Serialize)]
struct LocationServicesResponse {
    location: Location,
    services: Vec<ServiceResponse>,
}

// Maps the error taxonomy onto the wire: validation failures are 400s with
// a message, missing rows are bare-bones 404s, everything else is a 500
// carrying the underlying error text.
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String, Error),
}

impl ApiError {
    fn from_lookup(error: Error, not_found_message: &str, context: &str) -> Self {
        match error {
            Error::NotFound => ApiError::NotFound(not_found_message.to_string()),
            x => ApiError::Internal(context.to_string(), x),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'static> {
        match self {
            ApiError::BadRequest(message) => (
                Status::BadRequest,
                Json(ErrorResponse {
                    error: "Bad Request".to_string(),
                    message,
                    stack: None,
                }),
            )
                .respond_to(request),
            ApiError::NotFound(error) => {
                (Status::NotFound, Json(NotFoundResponse { error })).respond_to(request)
            }
            ApiError::Internal(message, cause) => {
                log::error!("{}: {}", message, cause);
                (
                    Status::InternalServerError,
                    Json(ErrorResponse {
                        error: "Database error".to_string(),
                        message,
                        stack: Some(cause.to_string()),
                    }),
                )
                    .respond_to(request)
            }
        }
    }
}

#[get("/health")]
fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[get("/locations")]
async fn locations(data: &State<DataClient>) -> Result<Json<Vec<Location>>, ApiError> {
    data.all_locations()
        .await
        .map(Json)
        .map_err(|x| ApiError::Internal("Failed to retrieve locations".to_string(), x))
}

#[get("/operators")]
async fn operators(data: &State<DataClient>) -> Result<Json<Vec<Operator>>, ApiError> {
    data.all_operators()
        .await
        .map(Json)
        .map_err(|x| ApiError::Internal("Failed to retrieve operators".to_string(), x))
}

#[get("/service?<headcode>")]
async fn service(
    headcode: Option<&str>,
    data: &State<DataClient>,
) -> Result<Json<Vec<ServiceResponse>>, ApiError> {
    let headcode = match headcode {
        Some(x) if !x.is_empty() => x,
        _ => {
            return Err(ApiError::BadRequest(
                "headcode query parameter is required".to_string(),
            ))
        }
    };

    let mut services = data
        .services_by_headcode(headcode)
        .await
        .map_err(|x| ApiError::Internal("Failed to query schedule table".to_string(), x))?;

    if services.is_empty() {
        return Err(ApiError::NotFound("No services found".to_string()));
    }

    data.add_realtime_data(&mut services, Utc::now()).await;

    Ok(Json(services))
}

// Exactly one locator may be supplied; each resolves to a STANOX through
// the reference resolver.
async fn resolve_stanox(
    data: &DataClient,
    stanox: Option<&str>,
    crs: Option<&str>,
    tiploc: Option<&str>,
    name: Option<&str>,
) -> Result<String, ApiError> {
    let given = [stanox, crs, tiploc, name]
        .iter()
        .filter(|x| x.is_some())
        .count();
    if given != 1 {
        return Err(ApiError::BadRequest(
            "exactly one of stanox, crs, tiploc or name is required".to_string(),
        ));
    }

    let resolved = if let Some(stanox) = stanox {
        Ok(stanox.to_string())
    } else if let Some(crs) = crs {
        data.stanox_by_crs(crs).await
    } else if let Some(tiploc) = tiploc {
        data.stanox_by_tiploc(tiploc, TIPLOC_TTL).await
    } else if let Some(name) = name {
        data.stanox_by_location_name(name).await
    } else {
        unreachable!()
    };

    resolved.map_err(|x| ApiError::from_lookup(x, "Location not found", "Failed to resolve location"))
}

#[get("/services/at-location?<name>&<crs>&<tiploc>&<stanox>&<date>")]
async fn services_at_location(
    name: Option<&str>,
    crs: Option<&str>,
    tiploc: Option<&str>,
    stanox: Option<&str>,
    date: Option<&str>,
    data: &State<DataClient>,
) -> Result<Json<LocationServicesResponse>, ApiError> {
    let date = match date {
        Some(x) => NaiveDate::parse_from_str(x, "%Y-%m-%d")
            .map_err(|_| ApiError::BadRequest("date must be formatted YYYY-MM-DD".to_string()))?,
        None => Utc::now().date_naive(),
    };

    let stanox = resolve_stanox(data, stanox, crs, tiploc, name).await?;

    let location = data.location_details(&stanox).await.map_err(|x| {
        ApiError::from_lookup(x, "Location not found", "Failed to load location details")
    })?;

    let mut services = data
        .scheduled_services_at_location(&stanox, date)
        .await
        .map_err(|x| ApiError::Internal("Failed to query services at location".to_string(), x))?;

    let day_start = date
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .unwrap_or_else(Utc::now);
    data.add_realtime_data(&mut services, day_start).await;

    Ok(Json(LocationServicesResponse { location, services }))
}

#[derive(Deserialize)]
struct PassesThroughRequest {
    stanox: Option<String>,
    crs: Option<String>,
    tiploc: Option<String>,
    name: Option<String>,
    time_from: Option<DateTime<Utc>>,
    time_to: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ServiceQueryRequest {
    headcode: Option<String>,
    operator_code: Option<String>,
    #[serde(default)]
    passes_through: Vec<PassesThroughRequest>,
}

#[post("/services/query", data = "<body>")]
async fn services_query(
    body: Json<ServiceQueryRequest>,
    data: &State<DataClient>,
) -> Result<Json<Vec<ServiceResponse>>, ApiError> {
    let body = body.into_inner();

    let mut passes_through = vec![];
    for entry in &body.passes_through {
        let stanox = resolve_stanox(
            data,
            entry.stanox.as_deref(),
            entry.crs.as_deref(),
            entry.tiploc.as_deref(),
            entry.name.as_deref(),
        )
        .await?;

        passes_through.push(LocationFilter {
            stanox,
            time_from: entry.time_from,
            time_to: entry.time_to,
        });
    }

    let filters = ServiceFilters {
        headcode: body.headcode,
        operator_code: body.operator_code,
        passes_through,
    };

    let mut services = data
        .services_with_filters(&filters)
        .await
        .map_err(|x| ApiError::Internal("Failed to execute service query".to_string(), x))?;

    // Realtime is anchored on the earliest requested day, or now for a
    // query with no time windows.
    let realtime_date = filters
        .passes_through
        .iter()
        .filter_map(|f| f.time_from)
        .min()
        .unwrap_or_else(Utc::now);
    data.add_realtime_data(&mut services, realtime_date).await;

    Ok(Json(services))
}

pub async fn rocket(data: DataClient) -> Result<(), Error> {
    rocket::build()
        .mount(
            "/",
            routes![
                health,
                locations,
                operators,
                service,
                services_at_location,
                services_query
            ],
        )
        .manage(data)
        .launch()
        .await?;

    Err(Error::WebUiError(WebUiError {
        what: "Shutdown requested".to_string(),
    }))
}
