use bitcoin::consensus::encode::serialize;
use bitcoin::consensus::Encodable;

pub trait DBKey: Encodable {
    fn col(&self) -> &'static str;

    fn encode(&self) -> Vec<u8> {
        serialize(self)
    }
}
