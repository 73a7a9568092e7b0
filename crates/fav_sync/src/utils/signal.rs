use std::io;

use tokio::signal;

/// 等待第一个退出信号，返回信号名
#[cfg(unix)]
pub async fn shutdown_signal() -> io::Result<&'static str> {
    use signal::unix::{SignalKind, signal as listen};

    // docker stop 发送 SIGTERM，终端里按 ctrl + c 发送 SIGINT
    let mut sigterm = listen(SignalKind::terminate())?;
    let mut sigint = listen(SignalKind::interrupt())?;
    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> io::Result<&'static str> {
    signal::ctrl_c().await.map(|_| "ctrl-c")
}
