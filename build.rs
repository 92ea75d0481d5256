use vergen::EmitBuilder;

fn main() {
    // 生成构建信息（构建时间戳用于 --version 输出）
    EmitBuilder::builder()
        .build_timestamp()
        .emit()
        .expect("Failed to generate build information");
}
