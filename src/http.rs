pub use peercall_ureq_http_client::{HttpClient, HttpRequest, HttpResponse, UreqHttpClient};
