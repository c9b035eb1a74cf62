//! Mailcast HTTP API.
//!
//! Endpoints:
//! - GET    /health
//! - POST   /api/campaigns                    create a campaign
//! - GET    /api/campaigns                    list the project's campaigns
//! - GET    /api/campaigns/{id}               fetch one campaign
//! - PUT    /api/campaigns/{id}               replace content and recipients
//! - DELETE /api/campaigns/{id}               delete a campaign
//! - POST   /api/campaigns/{id}/duplicate     copy into a new draft
//! - GET    /api/campaigns/{id}/recipients    paginated recipient list
//! - POST   /api/campaigns/send               live or test send
//! - POST   /api/contacts/subscribe           subscribe a contact
//! - POST   /api/contacts/unsubscribe         unsubscribe a contact

pub mod middleware;
pub mod routes;
pub mod state;
