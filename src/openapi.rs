use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Apothecary API",
        description = "Checkout, payment reconciliation and order fulfillment for a traditional-medicine practice"
    ),
    paths(
        crate::handlers::checkout_links::issue_checkout_link,
        crate::handlers::checkout::checkout_summary,
        crate::handlers::checkout::create_hosted_session,
        crate::handlers::checkout::create_promptpay_session,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::update_order_status,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::services::checkout_links::IssuedCheckoutLink,
        crate::services::payment_sessions::CheckoutSummary,
        crate::services::payment_sessions::SummaryLine,
        crate::services::payment_sessions::HostedSession,
        crate::services::payment_sessions::PromptPaySession,
        crate::services::notifications::NotificationOutcome,
        crate::handlers::checkout::ShippingRequest,
        crate::handlers::checkout::HostedSessionRequest,
        crate::handlers::orders::UpdateOrderStatusRequest,
    )),
    tags(
        (name = "Checkout", description = "Checkout links and payment sessions"),
        (name = "Payments", description = "Processor webhook"),
        (name = "Orders", description = "Order fulfillment")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
