use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("http request failed on `{stage}`: {source}"))]
    Http {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("backend returned status {status} on `{stage}`: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to decode response body on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode `{event}` event payload: {source}"))]
    DecodeEvent {
        stage: &'static str,
        event: String,
        source: serde_json::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;
