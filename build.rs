use vergen::EmitBuilder;

fn main() {
    // 构建时间和 git 短哈希，供 `downtask --version` 展示
    if let Err(e) = EmitBuilder::builder()
        .build_timestamp()
        .git_sha(true)
        .emit()
    {
        println!("cargo:warning=无法生成构建信息: {}", e);
    }
}
