use crate::server::ServerError;
use axum::{
    extract::FromRequestParts,
    http::{HeaderName, HeaderValue, request::Parts},
};
use axum_extra::TypedHeader;
use feder_common::model::user::Email;
use headers::Header;

static X_ACTING_EMAIL: HeaderName = HeaderName::from_static("x-acting-email");

/// The `x-acting-email` header naming the user a request acts as.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ActingEmail(pub Email);

impl Header for ActingEmail {
    fn name() -> &'static HeaderName {
        &X_ACTING_EMAIL
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = values.next().ok_or_else(headers::Error::invalid)?;
        let email = value.to_str().map_err(|_| headers::Error::invalid())?;
        Email::new(email.to_owned())
            .map(Self)
            .map_err(|_| headers::Error::invalid())
    }

    fn encode<E: Extend<HeaderValue>>(&self, values: &mut E) {
        if let Ok(value) = HeaderValue::from_str(self.0.get()) {
            values.extend(std::iter::once(value));
        }
    }
}

/// The user a request acts as. Identity is asserted by the caller, not verified.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct ActingUser(pub Email);

impl<S> FromRequestParts<S> for ActingUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(ActingEmail(email)) =
            TypedHeader::<ActingEmail>::from_request_parts(parts, state)
                .await
                .map_err(ServerError::InvalidActingUser)?;

        Ok(Self(email))
    }
}

#[cfg(test)]
mod tests {
    use crate::server::acting::ActingEmail;
    use axum::http::HeaderValue;
    use headers::Header;

    #[test]
    fn decodes_valid_emails_only() {
        let valid = [HeaderValue::from_static("ada@example.com")];
        let decoded = ActingEmail::decode(&mut valid.iter()).unwrap();
        assert_eq!(decoded.0.get(), "ada@example.com");

        let invalid = [HeaderValue::from_static("not an email")];
        assert!(ActingEmail::decode(&mut invalid.iter()).is_err());
        let none: [HeaderValue; 0] = [];
        assert!(ActingEmail::decode(&mut none.iter()).is_err());
    }
}
