use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::email::is_valid_email;
use crate::error::Error;

/// Minimum length for new passwords (registration, change, reset).
pub const MIN_PASSWORD_LEN: usize = 8;

/// Identity Service user identifier (opaque string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct UserId(pub String);

/// Validated email address.
///
/// Guaranteed well-formed by construction.
/// Use `"a@b.com".parse::<Email>()` or `Email::try_from(string)` to create.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for Email {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let s = s.trim().to_owned();
        if is_valid_email(&s) {
            Ok(Self(s))
        } else {
            Err(Error::Validation(format!("invalid email address: {s:?}")))
        }
    }
}

impl From<Email> for String {
    fn from(e: Email) -> Self {
        e.0
    }
}

/// Declares an opaque secret string whose `Debug` output is redacted.
macro_rules! secret_string {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
}

secret_string!(
    /// Short-lived bearer credential.
    AccessToken
);
secret_string!(
    /// Longer-lived credential exchanged for a new token pair.
    RefreshToken
);
secret_string!(
    /// User-entered password.
    Password
);

/// Access + refresh token pair. Both rotate together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

/// Storefront role as assigned by the Identity Service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[display("customer")]
    Customer,
    #[display("employee")]
    Employee,
    #[display("admin")]
    Admin,
    #[display("corporate_admin")]
    CorporateAdmin,
    /// Any role string this client does not know. Grants nothing.
    #[serde(other)]
    #[display("unknown")]
    Unknown,
}

/// Corporate account details attached to corporate users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CorporateDetails {
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub is_approved: bool,
}

impl CorporateDetails {
    #[must_use]
    pub fn new(is_approved: bool) -> Self {
        Self {
            company_name: None,
            is_approved,
        }
    }

    #[must_use]
    pub fn with_company_name(mut self, name: impl Into<String>) -> Self {
        self.company_name = Some(name.into());
        self
    }
}

/// Authenticated-user snapshot from the Identity Service.
///
/// `role` and `corporate_details` are read-only from the client's side:
/// they change only when a fresh snapshot arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub corporate_details: Option<CorporateDetails>,
}

impl User {
    /// Create a user snapshot with the required fields.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            id: UserId(id.into()),
            email: email.into(),
            name: None,
            phone: None,
            role,
            email_verified: false,
            corporate_details: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_email_verified(mut self, verified: bool) -> Self {
        self.email_verified = verified;
        self
    }

    #[must_use]
    pub fn with_corporate_details(mut self, details: CorporateDetails) -> Self {
        self.corporate_details = Some(details);
        self
    }

    /// Whether the user's corporate account has been approved.
    #[must_use]
    pub fn is_corporate_approved(&self) -> bool {
        self.corporate_details
            .as_ref()
            .is_some_and(|d| d.is_approved)
    }
}

/// Successful login/registration payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuthResponse {
    pub user: User,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
}

impl AuthResponse {
    #[must_use]
    pub fn new(user: User, tokens: TokenPair) -> Self {
        Self {
            user,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }
    }
}

/// Login request body.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: Email,
    pub password: Password,
}

impl Credentials {
    /// Validate and build login credentials.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the email is malformed or the password is empty.
    pub fn new(email: &str, password: &str) -> Result<Self, Error> {
        let email: Email = email.parse()?;
        if password.is_empty() {
            return Err(Error::Validation("password must not be empty".into()));
        }
        Ok(Self {
            email,
            password: Password::new(password),
        })
    }
}

/// Customer self-registration fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: String,
    pub password: Password,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Registration {
    #[must_use]
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: Password::new(password),
            first_name: first_name.into(),
            last_name: last_name.into(),
            phone: None,
        }
    }

    #[must_use]
    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        if !is_valid_email(self.email.trim()) {
            return Err(Error::Validation(format!(
                "invalid email address: {:?}",
                self.email
            )));
        }
        validate_new_password(&self.password)?;
        if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
            return Err(Error::Validation("first and last name are required".into()));
        }
        Ok(())
    }
}

/// Corporate account registration: a customer registration plus company data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorporateRegistration {
    #[serde(flatten)]
    pub account: Registration,
    pub company_name: String,
    pub tax_number: String,
}

impl CorporateRegistration {
    #[must_use]
    pub fn new(
        account: Registration,
        company_name: impl Into<String>,
        tax_number: impl Into<String>,
    ) -> Self {
        Self {
            account,
            company_name: company_name.into(),
            tax_number: tax_number.into(),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), Error> {
        self.account.validate()?;
        if self.company_name.trim().is_empty() {
            return Err(Error::Validation("company name is required".into()));
        }
        if self.tax_number.trim().is_empty() {
            return Err(Error::Validation("tax number is required".into()));
        }
        Ok(())
    }
}

/// Editable profile fields. Role and approval state are deliberately absent.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Password change request for the signed-in user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChange {
    pub current_password: Password,
    pub new_password: Password,
}

impl PasswordChange {
    #[must_use]
    pub fn new(current: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            current_password: Password::new(current),
            new_password: Password::new(new),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the new password is too short or unchanged.
    pub fn validate(&self) -> Result<(), Error> {
        if self.current_password.is_empty() {
            return Err(Error::Validation("current password is required".into()));
        }
        validate_new_password(&self.new_password)?;
        if self.current_password == self.new_password {
            return Err(Error::Validation(
                "new password must differ from the current one".into(),
            ));
        }
        Ok(())
    }
}

pub(crate) fn validate_new_password(password: &Password) -> Result<(), Error> {
    if password.as_str().chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_parse_trims_and_validates() {
        let email: Email = " a@b.com ".parse().unwrap();
        assert_eq!(email.as_str(), "a@b.com");
        assert!("not-an-email".parse::<Email>().is_err());
    }

    #[test]
    fn tokens_are_redacted_in_debug() {
        let token = AccessToken::new("secret-value");
        assert_eq!(format!("{token:?}"), "AccessToken(..)");
        let creds = Credentials::new("a@b.com", "Secret1!").unwrap();
        assert!(!format!("{creds:?}").contains("Secret1!"));
    }

    #[test]
    fn credentials_reject_empty_password() {
        assert!(matches!(
            Credentials::new("a@b.com", ""),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn user_deserializes_camel_case_snapshot() {
        let json = r#"{
            "id": "u-1",
            "email": "corp@b.com",
            "role": "corporate_admin",
            "emailVerified": true,
            "corporateDetails": { "companyName": "Acme", "isApproved": false }
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.role, Role::CorporateAdmin);
        assert!(user.email_verified);
        assert!(!user.is_corporate_approved());
    }

    #[test]
    fn unknown_role_decodes_to_unknown() {
        let json = r#"{ "id": "u-2", "email": "x@b.com", "role": "superuser" }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.role, Role::Unknown);
        assert!(user.corporate_details.is_none());
    }

    #[test]
    fn registration_validation() {
        let ok = Registration::new("a@b.com", "longenough", "Ada", "Lovelace");
        assert!(ok.validate().is_ok());

        let short = Registration::new("a@b.com", "short", "Ada", "Lovelace");
        assert!(short.validate().is_err());

        let nameless = Registration::new("a@b.com", "longenough", " ", "Lovelace");
        assert!(nameless.validate().is_err());
    }

    #[test]
    fn corporate_registration_flattens_account_fields() {
        let reg = CorporateRegistration::new(
            Registration::new("corp@b.com", "longenough", "Ada", "Lovelace"),
            "Acme",
            "TX-42",
        );
        assert!(reg.validate().is_ok());
        let json = serde_json::to_value(&reg).unwrap();
        assert_eq!(json["email"], "corp@b.com");
        assert_eq!(json["companyName"], "Acme");
        assert_eq!(json["taxNumber"], "TX-42");
    }

    #[test]
    fn password_change_must_differ() {
        assert!(PasswordChange::new("longenough", "longenough").validate().is_err());
        assert!(PasswordChange::new("oldpassword", "newpassword").validate().is_ok());
    }

    #[test]
    fn profile_update_omits_unset_fields() {
        let update = ProfileUpdate {
            name: Some("Ada".into()),
            phone: None,
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "Ada" }));
    }
}
