/// Builds the messages, gRPC stubs and file descriptor set for the `greet`,
/// `calculator` and `document` packages.
///
/// The schema is declared once, in the tables below, as a
/// [`FileDescriptorSet`]. That set drives all three outputs, so the build does
/// not need a `protoc` binary:
///
/// - message structs, through `prost-build` (`Config::compile_fds`),
/// - client and server stubs, through `tonic-build`'s manual builder wired to
///   `tonic_prost::ProstCodec`,
/// - `shapes_descriptor.bin`, the encoded set served by `tonic-reflection`.
///
/// # Output
///
/// ```rust,ignore
/// pub mod greet {
///     tonic::include_proto!("greet");
///     include!(concat!(env!("OUT_DIR"), "/greet.Greeter.rs"));
/// }
/// pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("shapes_descriptor");
/// ```
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
use prost::Message as _;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};
use std::{env, fs, path::PathBuf};
use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic_prost::ProstCodec";

#[derive(Clone, Copy)]
enum Kind {
    Scalar(Type),
    /// Message type in the same package.
    Message(&'static str),
}

struct Message {
    name: String,
    fields: Vec<(&'static str, i32, Kind)>,
}

/// The four cardinalities a gRPC method can take.
#[derive(Clone, Copy)]
enum Shape {
    Unary,
    ServerStreaming,
    ClientStreaming,
    Bidirectional,
}

impl Shape {
    const fn client_streaming(self) -> bool {
        matches!(self, Self::ClientStreaming | Self::Bidirectional)
    }

    const fn server_streaming(self) -> bool {
        matches!(self, Self::ServerStreaming | Self::Bidirectional)
    }
}

struct Rpc {
    name: &'static str,
    input: String,
    output: String,
    shape: Shape,
}

struct Package {
    name: &'static str,
    service: &'static str,
    messages: Vec<Message>,
    rpcs: Vec<Rpc>,
}

fn message(name: impl Into<String>, fields: &[(&'static str, i32, Kind)]) -> Message {
    Message {
        name: name.into(),
        fields: fields.to_vec(),
    }
}

fn single(name: impl Into<String>, field: &'static str, kind: Kind) -> Message {
    message(name, &[(field, 1, kind)])
}

/// A request and a response sharing the `Name` prefix.
fn pair(name: &'static str, shape: Shape) -> Rpc {
    Rpc {
        name,
        input: format!("{name}Request"),
        output: format!("{name}Response"),
        shape,
    }
}

fn greet() -> Package {
    let mut messages = vec![message(
        "Greeting",
        &[
            ("first_name", 1, Kind::Scalar(Type::String)),
            ("last_name", 2, Kind::Scalar(Type::String)),
        ],
    )];
    let rpcs = vec![
        pair("Greet", Shape::Unary),
        pair("GreetManyTimes", Shape::ServerStreaming),
        pair("LongGreet", Shape::ClientStreaming),
        pair("GreetEveryone", Shape::Bidirectional),
        pair("GreetWithDeadline", Shape::Unary),
    ];
    for rpc in &rpcs {
        messages.push(single(&*rpc.input, "greeting", Kind::Message("Greeting")));
        messages.push(single(&*rpc.output, "result", Kind::Scalar(Type::String)));
    }

    Package {
        name: "greet",
        service: "Greeter",
        messages,
        rpcs,
    }
}

fn calculator() -> Package {
    let int32 = Kind::Scalar(Type::Int32);
    let int64 = Kind::Scalar(Type::Int64);
    let float = Kind::Scalar(Type::Float);
    let double = Kind::Scalar(Type::Double);

    Package {
        name: "calculator",
        service: "Calculator",
        messages: vec![
            message(
                "SumRequest",
                &[("first_number", 1, int32), ("second_number", 2, int32)],
            ),
            single("SumResponse", "result", int64),
            single("PrimeNumberDecompositionRequest", "number", int64),
            single("PrimeNumberDecompositionResponse", "factor", int64),
            single("AverageRequest", "number", int32),
            single("AverageResponse", "result", double),
            single("FindMaximumRequest", "next_number", float),
            single("FindMaximumResponse", "current_max", float),
            single("SquareRootRequest", "number", int32),
            single("SquareRootResponse", "number_root", double),
        ],
        rpcs: vec![
            pair("Sum", Shape::Unary),
            pair("PrimeNumberDecomposition", Shape::ServerStreaming),
            pair("Average", Shape::ClientStreaming),
            pair("FindMaximum", Shape::Bidirectional),
            pair("SquareRoot", Shape::Unary),
        ],
    }
}

fn document() -> Package {
    let string = Kind::Scalar(Type::String);
    let document = Kind::Message("Document");

    Package {
        name: "document",
        service: "Documents",
        messages: vec![
            message(
                "Document",
                &[
                    ("id", 1, string),
                    ("author_id", 2, string),
                    ("title", 3, string),
                    ("content", 4, string),
                ],
            ),
            single("CreateDocumentRequest", "document", document),
            single("CreateDocumentResponse", "document", document),
            single("ReadDocumentRequest", "document_id", string),
            single("ReadDocumentResponse", "document", document),
            single("UpdateDocumentRequest", "document", document),
            single("UpdateDocumentResponse", "document", document),
            single("DeleteDocumentRequest", "document_id", string),
            single("DeleteDocumentResponse", "document_id", string),
            message("ListDocumentsRequest", &[]),
            single("ListDocumentsResponse", "document", document),
        ],
        rpcs: vec![
            pair("CreateDocument", Shape::Unary),
            pair("ReadDocument", Shape::Unary),
            pair("UpdateDocument", Shape::Unary),
            pair("DeleteDocument", Shape::Unary),
            pair("ListDocuments", Shape::ServerStreaming),
        ],
    }
}

fn qualified(package: &str, name: &str) -> String {
    format!(".{package}.{name}")
}

fn describe(package: &Package) -> FileDescriptorProto {
    let message_type = package
        .messages
        .iter()
        .map(|message| DescriptorProto {
            name: Some(message.name.clone()),
            field: message
                .fields
                .iter()
                .map(|(name, number, kind)| {
                    let (ty, type_name) = match kind {
                        Kind::Scalar(ty) => (*ty, None),
                        Kind::Message(name) => (Type::Message, Some(qualified(package.name, name))),
                    };
                    FieldDescriptorProto {
                        name: Some((*name).into()),
                        number: Some(*number),
                        label: Some(Label::Optional as i32),
                        r#type: Some(ty as i32),
                        type_name,
                        json_name: Some(json_name(name)),
                        ..Default::default()
                    }
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    let method = package
        .rpcs
        .iter()
        .map(|rpc| MethodDescriptorProto {
            name: Some(rpc.name.into()),
            input_type: Some(qualified(package.name, &rpc.input)),
            output_type: Some(qualified(package.name, &rpc.output)),
            client_streaming: Some(rpc.shape.client_streaming()),
            server_streaming: Some(rpc.shape.server_streaming()),
            ..Default::default()
        })
        .collect();

    FileDescriptorProto {
        name: Some(format!("{}.proto", package.name)),
        package: Some(package.name.into()),
        message_type,
        service: vec![ServiceDescriptorProto {
            name: Some(package.service.into()),
            method,
            ..Default::default()
        }],
        syntax: Some("proto3".into()),
        ..Default::default()
    }
}

/// `first_name` -> `firstName`
fn json_name(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// `GreetManyTimes` -> `greet_many_times`
fn snake_case(route: &str) -> String {
    let mut out = String::with_capacity(route.len() + 4);
    for (i, c) in route.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn stubs(package: &Package) -> Service {
    package
        .rpcs
        .iter()
        .fold(
            Service::builder().name(package.service).package(package.name),
            |service, rpc| {
                let method = Method::builder()
                    .name(&snake_case(rpc.name))
                    .route_name(rpc.name)
                    .input_type(format!("super::{}", rpc.input))
                    .output_type(format!("super::{}", rpc.output))
                    .codec_path(CODEC);
                let method = match rpc.shape {
                    Shape::Unary => method,
                    Shape::ServerStreaming => method.server_streaming(),
                    Shape::ClientStreaming => method.client_streaming(),
                    Shape::Bidirectional => method.client_streaming().server_streaming(),
                };
                service.method(method.build())
            },
        )
        .build()
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let packages = [greet(), calculator(), document()];
    let descriptor_set = FileDescriptorSet {
        file: packages.iter().map(describe).collect(),
    };

    fs::write(
        out_dir.join("shapes_descriptor.bin"),
        descriptor_set.encode_to_vec(),
    )
    .unwrap();

    tonic_prost_build::Config::new()
        .compile_fds(descriptor_set)
        .unwrap();

    let services: Vec<Service> = packages.iter().map(stubs).collect();
    Builder::new().compile(&services);
}
