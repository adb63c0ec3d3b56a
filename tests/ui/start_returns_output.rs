#[uthread::start]
fn main() -> Result<(), std::num::ParseIntError> {
    let id = uthread::create(|| {}).unwrap();
    assert_eq!(id.slot(), 1);
    "7".parse::<u8>().map(drop)
}
