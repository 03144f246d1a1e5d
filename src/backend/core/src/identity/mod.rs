//! Identity entities: users, organizations and API keys.
//!
//! An API key is a [`User`] whose type is [`UserType::ApiKey`]; its
//! username is the key identifier and only a hash of its secret is kept.

pub mod models;
pub mod validation;

pub use models::{
    NewOrganization, NewUser, Organization, OrganizationDraft, OrganizationId, OrganizationRef,
    OrganizationUpdate, User, UserDraft, UserFilter, UserId, UserInfo, UserRecord, UserType,
    UserUpdate,
};
pub use validation::AppliedUpdate;
