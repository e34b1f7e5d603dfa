use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health_check,
        api::devices::list_devices,
        api::devices::get_device,
        api::devices::upsert_device,
        api::changes::list_changes,
        api::changes::create_change,
        api::changes::get_change,
        api::changes::approve_change,
        api::changes::reject_change,
        api::changes::execute_change,
        api::changes::execute_all_approved,
        api::changes::annotate_change,
        api::queue::get_status,
        api::queue::list_entries,
        api::queue::get_device_queue,
        api::queue::cleanup,
    ),
    tags(
        (name = "changegate", description = "Router change approval and execution API")
    )
)]
pub struct ApiDoc;
