//! Wire messages and generated gRPC stubs.
//!
//! Everything here is generated by `build.rs` from one schema description.
//! Field tags are part of the wire contract and must never be reused.
//!
//! - [`greet`] - `greet.Greeter`, one method per interaction shape plus a
//!   deadline-aware unary call.
//! - [`calculator`] - `calculator.Calculator`, numeric workloads for every
//!   shape.
//! - [`document`] - `document.Documents`, CRUD over stored documents.

pub mod calculator;
pub mod document;
pub mod greet;

/// Encoded `FileDescriptorSet` of the three packages, for server reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("shapes_descriptor");

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::FileDescriptorSet;

    #[test]
    fn descriptor_set_lists_every_route() {
        let set = FileDescriptorSet::decode(FILE_DESCRIPTOR_SET).unwrap();

        let mut routes: Vec<String> = set
            .file
            .iter()
            .flat_map(|file| {
                file.service.iter().flat_map(move |service| {
                    service.method.iter().map(move |method| {
                        format!(
                            "{}.{}/{}",
                            file.package(),
                            service.name(),
                            method.name()
                        )
                    })
                })
            })
            .collect();
        routes.sort();

        assert_eq!(
            routes,
            [
                "calculator.Calculator/Average",
                "calculator.Calculator/FindMaximum",
                "calculator.Calculator/PrimeNumberDecomposition",
                "calculator.Calculator/SquareRoot",
                "calculator.Calculator/Sum",
                "document.Documents/CreateDocument",
                "document.Documents/DeleteDocument",
                "document.Documents/ListDocuments",
                "document.Documents/ReadDocument",
                "document.Documents/UpdateDocument",
                "greet.Greeter/Greet",
                "greet.Greeter/GreetEveryone",
                "greet.Greeter/GreetManyTimes",
                "greet.Greeter/GreetWithDeadline",
                "greet.Greeter/LongGreet",
            ]
        );
    }

    #[test]
    fn descriptor_set_marks_streaming_directions() {
        let set = FileDescriptorSet::decode(FILE_DESCRIPTOR_SET).unwrap();
        let method = |name: &str| {
            set.file
                .iter()
                .flat_map(|f| &f.service)
                .flat_map(|s| &s.method)
                .find(|m| m.name() == name)
                .map(|m| (m.client_streaming(), m.server_streaming()))
                .unwrap()
        };

        assert_eq!(method("Sum"), (false, false));
        assert_eq!(method("PrimeNumberDecomposition"), (false, true));
        assert_eq!(method("Average"), (true, false));
        assert_eq!(method("FindMaximum"), (true, true));
    }

    #[test]
    fn generated_messages_keep_their_tags() {
        // first_name = 1, last_name = 2
        let greeting = greet::Greeting {
            first_name: "a".into(),
            last_name: "b".into(),
        };
        assert_eq!(greeting.encode_to_vec(), [0x0a, 1, b'a', 0x12, 1, b'b']);

        let doc = document::Document {
            content: "c".into(),
            ..Default::default()
        };
        assert_eq!(doc.encode_to_vec(), [0x22, 1, b'c']);
    }
}
