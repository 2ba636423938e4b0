use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: Option<String>,
    pub voucher_env: String,
    pub api_bind: String,
    pub public_url: String,
    pub admin_token: String,
    pub link_secret: String,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub currency: String,
    pub coupons_json: Option<String>,
    pub coupons_file: Option<String>,
    pub coupon_ttl_secs: u64,
    pub product_prices_json: Option<String>,
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    pub email_from: String,
    pub http_timeout_secs: u64,
    pub worker_interval_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let database_url = std::env::var("VOUCHER_DATABASE_URL")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .ok();
        let voucher_env =
            std::env::var("VOUCHER_ENV").unwrap_or_else(|_| "development".to_string());
        let api_bind =
            std::env::var("VOUCHER_API_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let public_url = std::env::var("VOUCHER_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();
        let admin_token = std::env::var("VOUCHER_ADMIN_TOKEN")?;
        let link_secret = std::env::var("VOUCHER_LINK_SECRET")?;
        let stripe_secret_key = non_empty_var("STRIPE_SECRET_KEY");
        let stripe_api_base = std::env::var("STRIPE_API_BASE")
            .unwrap_or_else(|_| "https://api.stripe.com".to_string());
        let currency = std::env::var("CHECKOUT_CURRENCY")
            .unwrap_or_else(|_| "eur".to_string())
            .to_lowercase();
        let coupons_json = non_empty_var("VOUCHER_COUPONS");
        let coupons_file = non_empty_var("VOUCHER_COUPONS_FILE");
        let coupon_ttl_secs = std::env::var("VOUCHER_COUPON_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let product_prices_json = non_empty_var("VOUCHER_PRODUCT_PRICES");
        let email_api_url = non_empty_var("EMAIL_API_URL");
        let email_api_key = non_empty_var("EMAIL_API_KEY");
        let email_from =
            std::env::var("EMAIL_FROM").unwrap_or_else(|_| "gutscheine@localhost".to_string());
        let http_timeout_secs = std::env::var("VOUCHER_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let worker_interval_secs = std::env::var("VOUCHER_WORKER_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Ok(Self {
            database_url,
            voucher_env,
            api_bind,
            public_url,
            admin_token,
            link_secret,
            stripe_secret_key,
            stripe_api_base,
            currency,
            coupons_json,
            coupons_file,
            coupon_ttl_secs,
            product_prices_json,
            email_api_url,
            email_api_key,
            email_from,
            http_timeout_secs,
            worker_interval_secs,
        })
    }

    pub fn is_production(&self) -> bool {
        self.voucher_env == "production"
    }

    /// Settings for local runs and tests: no database, no payment or email collaborator.
    pub fn local(admin_token: &str, link_secret: &str) -> Self {
        Self {
            database_url: None,
            voucher_env: "development".to_string(),
            api_bind: "127.0.0.1:3000".to_string(),
            public_url: "http://localhost:3000".to_string(),
            admin_token: admin_token.to_string(),
            link_secret: link_secret.to_string(),
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            currency: "eur".to_string(),
            coupons_json: None,
            coupons_file: None,
            coupon_ttl_secs: 60,
            product_prices_json: None,
            email_api_url: None,
            email_api_key: None,
            email_from: "gutscheine@localhost".to_string(),
            http_timeout_secs: 10,
            worker_interval_secs: 60,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
