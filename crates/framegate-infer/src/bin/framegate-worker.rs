//! 추론 워커 바이너리.
//!
//! stdin/stdout으로 JSON 라인 프로토콜을 서빙한다. stdout은 프로토콜
//! 전용이므로 로그는 stderr로만 내보낸다.

use framegate_infer::runtime;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    match runtime::serve(stdin, stdout).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("워커 서빙 루프 실패: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}
