fn main() -> anyhow::Result<()> {
    nexonotes::cli::run()
}
