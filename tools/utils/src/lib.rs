//! 命令行工具依赖的通用组件.

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 安装终端日志. 环境变量 `RUST_LOG` 存在时覆盖 `level`.
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
}

/// 解析 `"H,W"` 形式的尺寸参数, 两维都必须为正.
pub fn parse_size(s: &str) -> Result<liver_seg::Idx2d, String> {
    let (h, w) = s
        .split_once(',')
        .ok_or_else(|| format!("尺寸应为 \"H,W\", 得到 {s:?}"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<usize>()
            .map_err(|e| format!("无效的尺寸分量 {v:?}: {e}"))
    };
    let size = (parse(h)?, parse(w)?);
    if size.0 == 0 || size.1 == 0 {
        return Err(format!("尺寸不能为 0: {s:?}"));
    }
    Ok(size)
}
