//! Backend paths. The Django router expects the trailing slash.

pub const LOGIN: &str = "/api/auth/login/";
pub const REGISTER: &str = "/api/auth/register/";
pub const LOGOUT: &str = "/api/auth/logout/";
pub const ME: &str = "/api/auth/me/";
pub const TOKEN_REFRESH: &str = "/api/token/refresh/";
pub const TOKEN_VERIFY: &str = "/api/token/verify/";
