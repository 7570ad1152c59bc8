use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{Datelike, Duration, NaiveDate, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use tracing::info;

use kindred_db::OtpCheck;
use kindred_db::models::NewUser;
use kindred_types::api::{
    AuthResponse, Claims, LoginRequest, OtpIssuedResponse, RefreshTokenRequest, RegisterRequest,
    ResendOtpRequest, StatusMessage, TokenPair, TokenType, UserProfile, VerifyOtpRequest,
};
use kindred_types::models::UserId;

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::users::load_profile;
use crate::{ApiSettings, AppState, blocking};

const MIN_PASSWORD_LEN: usize = 8;
const MIN_AGE: i32 = 18;

enum Registered {
    Active(UserProfile),
    PendingOtp(String),
}

pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = normalize_email(&req.email)?;
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::BadRequest("First and last name are required".into()));
    }

    let date_of_birth = NaiveDate::parse_from_str(&req.date_of_birth, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest("Invalid date format. Use YYYY-MM-DD".into()))?;
    if age_on(date_of_birth, Utc::now().date_naive()) < MIN_AGE {
        return Err(ApiError::BadRequest("You must be 18 or older to use this app".into()));
    }

    let phone = req
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(format_phone_number);

    let settings = state.settings.clone();
    let db = state.db.clone();
    let registered = blocking(move || -> Result<Registered, ApiError> {
        if db.get_user_by_email(&email)?.is_some() {
            return Err(ApiError::Conflict("User already exists with this email".into()));
        }
        if let Some(phone) = &phone {
            if db.phone_taken(phone)? {
                return Err(ApiError::Conflict("User already exists with this phone number".into()));
            }
        }

        let password_hash = hash_password(&req.password)?;
        let user_id = db.create_user(&NewUser {
            email: email.clone(),
            phone: phone.clone(),
            password_hash,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            date_of_birth,
            gender: req.gender,
            is_verified: !settings.otp_enabled,
        })?;
        info!("registered user {} ({})", user_id, email);

        if settings.otp_enabled {
            let code = generate_otp();
            db.create_otp(&email, phone.as_deref(), &code, settings.otp_expiry_minutes)?;
            return Ok(Registered::PendingOtp(code));
        }

        let user = db
            .get_user(user_id)?
            .ok_or_else(|| anyhow::anyhow!("user {} vanished after insert", user_id))?;
        Ok(Registered::Active(load_profile(&db, user)?))
    })
    .await?;

    let response = match registered {
        // The code is echoed back until an SMS/email gateway exists
        Registered::PendingOtp(otp) => (
            StatusCode::CREATED,
            Json(OtpIssuedResponse {
                message: "User created successfully. Please verify your account.".into(),
                otp,
            }),
        )
            .into_response(),
        Registered::Active(user) => (
            StatusCode::CREATED,
            Json(auth_response(&state.settings, Some("User created successfully"), user)?),
        )
            .into_response(),
    };
    Ok(response)
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let db = state.db.clone();
    let user = blocking(move || -> Result<UserProfile, ApiError> {
        let invalid = || ApiError::Unauthorized("Invalid credentials".into());
        let user = db.get_user_by_email(&email)?.ok_or_else(invalid)?;
        if !user.is_active {
            return Err(ApiError::Unauthorized("Account is deactivated".into()));
        }
        if !verify_password(&req.password, &user.password) {
            return Err(invalid());
        }

        db.set_online(user.id, true)?;
        let user = db.get_user(user.id)?.ok_or_else(invalid)?;
        Ok(load_profile(&db, user)?)
    })
    .await?;

    info!("user {} logged in", user.id);
    Ok(Json(auth_response(&state.settings, None, user)?))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<VerifyOtpRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let db = state.db.clone();
    let user = blocking(move || -> Result<UserProfile, ApiError> {
        match db.check_otp(&email, req.code.trim())? {
            OtpCheck::Invalid => return Err(ApiError::BadRequest("Invalid or expired OTP".into())),
            OtpCheck::Expired => return Err(ApiError::BadRequest("OTP has expired".into())),
            OtpCheck::Valid => {}
        }

        let user = db
            .get_user_by_email(&email)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        db.mark_verified(user.id)?;
        let user = db
            .get_user(user.id)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        Ok(load_profile(&db, user)?)
    })
    .await?;

    info!("user {} verified", user.id);
    Ok(Json(auth_response(
        &state.settings,
        Some("Account verified successfully"),
        user,
    )?))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResendOtpRequest>,
) -> Result<Json<OtpIssuedResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let settings = state.settings.clone();
    let db = state.db.clone();
    let otp = blocking(move || -> Result<String, ApiError> {
        let user = db
            .get_user_by_email(&email)?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        let code = generate_otp();
        db.create_otp(&email, user.phone.as_deref(), &code, settings.otp_expiry_minutes)?;
        Ok(code)
    })
    .await?;

    Ok(Json(OtpIssuedResponse {
        message: "OTP sent successfully".into(),
        otp,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let invalid = || ApiError::Unauthorized("Invalid refresh token".into());
    let claims =
        decode_token(&state.settings.jwt_secret, &req.refresh_token).map_err(|_| invalid())?;
    if claims.token_type != TokenType::Refresh {
        return Err(invalid());
    }

    let db = state.db.clone();
    let user = blocking(move || db.get_user(claims.sub))
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    Ok(Json(issue_pair(&state.settings, user.id, &user.email)?))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatusMessage>, ApiError> {
    let db = state.db.clone();
    blocking(move || db.set_online(claims.sub, false)).await?;
    info!("user {} logged out", claims.sub);
    Ok(Json(StatusMessage::new("Logged out successfully")))
}

// -- Tokens --

pub(crate) fn create_token(
    secret: &str,
    user_id: UserId,
    email: &str,
    token_type: TokenType,
    ttl: Duration,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        token_type,
        exp: (Utc::now() + ttl).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Decode and validate signature and expiry. The caller checks `token_type`.
pub(crate) fn decode_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))
}

fn issue_pair(settings: &ApiSettings, user_id: UserId, email: &str) -> Result<TokenPair, ApiError> {
    Ok(TokenPair {
        access_token: create_token(
            &settings.jwt_secret,
            user_id,
            email,
            TokenType::Access,
            Duration::hours(settings.jwt_expiry_hours),
        )?,
        refresh_token: create_token(
            &settings.jwt_secret,
            user_id,
            email,
            TokenType::Refresh,
            Duration::days(settings.refresh_expiry_days),
        )?,
    })
}

fn auth_response(
    settings: &ApiSettings,
    message: Option<&str>,
    user: UserProfile,
) -> Result<AuthResponse, ApiError> {
    let pair = issue_pair(settings, user.id, &user.email)?;
    Ok(AuthResponse {
        message: message.map(str::to_string),
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        user,
    })
}

// -- Passwords, OTP, validation --

/// Argon2id with a random salt. Slow on purpose: call from `spawn_blocking`.
pub(crate) fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Six decimal digits, zero-padded.
fn generate_otp() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000u32))
}

fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }
    Ok(email)
}

/// Whole years between `dob` and `today`.
pub(crate) fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

/// Normalise an Ethiopian phone number to `+251...`. Anything else just gets a `+`.
pub fn format_phone_number(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    if digits.len() == 9 && digits.starts_with('9') {
        format!("+251{}", digits)
    } else if digits.len() == 10 && digits.starts_with('0') {
        format!("+251{}", &digits[1..])
    } else {
        // Already carries a country code, 251 included
        format!("+{}", digits)
    }
}
